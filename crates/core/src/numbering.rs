//! Document number formatting.
//!
//! Numbers look like `{prefix}-{year}-{sequence}` with the sequence zero-padded
//! to four digits (wider once it passes 9999). The database layer owns the
//! locked counter; this module owns the format.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Longest accepted prefix.
pub const MAX_PREFIX_LEN: usize = 16;

/// Kind of document a sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Customer invoices.
    Invoice,
    /// Received payments.
    Payment,
}

impl DocumentKind {
    /// Returns the lowercase kind name stored on the sequence row.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Payment => "payment",
        }
    }
}

/// Validates and normalizes a prefix.
///
/// Prefixes are trimmed, upper-cased, and limited to ASCII letters and digits.
pub fn normalize_prefix(prefix: &str) -> Result<String, EngineError> {
    let trimmed = prefix.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_PREFIX_LEN
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric());

    if valid {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(EngineError::InvalidPrefix(prefix.to_string()))
    }
}

/// Formats a document number.
#[must_use]
pub fn format_number(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{prefix}-{year}-{sequence:04}")
}

/// POSIX regular expression matching numbers generated for `prefix` and
/// `year` whose sequence fits an `i64`.
///
/// `prefix` must already be normalized, so it holds no regex metacharacters.
#[must_use]
pub fn sequence_pattern(prefix: &str, year: i32) -> String {
    format!("^{prefix}-{year}-[0-9]{{1,18}}$")
}

/// Extracts the sequence from a number previously formatted with the same
/// prefix and year.
#[must_use]
pub fn parse_sequence(number: &str, prefix: &str, year: i32) -> Option<i64> {
    let digits = number.strip_prefix(&format!("{prefix}-{year}-"))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next sequence value: one past both the counter and the newest existing number.
#[must_use]
pub fn next_sequence(last_value: i64, latest_existing: Option<i64>) -> i64 {
    last_value.max(latest_existing.unwrap_or(0)) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "INV-2025-0001")]
    #[case(42, "INV-2025-0042")]
    #[case(9999, "INV-2025-9999")]
    #[case(10000, "INV-2025-10000")]
    fn test_format_number(#[case] sequence: i64, #[case] expected: &str) {
        assert_eq!(format_number("INV", 2025, sequence), expected);
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("INV-2025-0042", "INV", 2025), Some(42));
        assert_eq!(parse_sequence("INV-2025-10000", "INV", 2025), Some(10000));
        assert_eq!(parse_sequence("INV-2024-0042", "INV", 2025), None);
        assert_eq!(parse_sequence("PAY-2025-0042", "INV", 2025), None);
        assert_eq!(parse_sequence("INV-2025-00A2", "INV", 2025), None);
        assert_eq!(parse_sequence("INV-2025-", "INV", 2025), None);
    }

    #[test]
    fn test_sequence_pattern() {
        assert_eq!(sequence_pattern("INV", 2025), "^INV-2025-[0-9]{1,18}$");
    }

    #[test]
    fn test_next_sequence_passes_counter_and_existing() {
        assert_eq!(next_sequence(0, None), 1);
        assert_eq!(next_sequence(5, Some(3)), 6);
        assert_eq!(next_sequence(5, Some(12)), 13);
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(" inv ").unwrap(), "INV");
        assert_eq!(normalize_prefix("ar2").unwrap(), "AR2");
        assert!(normalize_prefix("AR_2").is_err());
        assert!(matches!(normalize_prefix(""), Err(EngineError::InvalidPrefix(_))));
        assert!(normalize_prefix("IN-V").is_err());
        assert!(normalize_prefix("INV'; DROP").is_err());
        assert!(normalize_prefix(&"X".repeat(MAX_PREFIX_LEN + 1)).is_err());
    }

    #[test]
    fn test_document_kind_names() {
        assert_eq!(DocumentKind::Invoice.as_str(), "invoice");
        assert_eq!(DocumentKind::Payment.as_str(), "payment");
    }
}
