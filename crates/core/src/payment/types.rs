//! Payment domain types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_shared::types::{CompanyId, CurrencyCode, CustomerId, PaymentId};

use crate::allocation::AllocationRequest;

/// Payment status.
///
/// `pending` and `completed` payments can be allocated; `cancelled` payments
/// are immutable except for their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Received but not yet settled by the processor.
    Pending,
    /// Settled.
    Completed,
    /// Rejected by the processor.
    Failed,
    /// Voided.
    Cancelled,
}

impl PaymentStatus {
    /// Returns true if allocations may be made against a payment in this status.
    #[must_use]
    pub fn can_be_allocated(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }

    /// Returns the lowercase status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash.
    Cash,
    /// Paper check.
    Check,
    /// Bank transfer.
    BankTransfer,
    /// Credit card.
    CreditCard,
    /// Debit card.
    DebitCard,
    /// PayPal.
    Paypal,
    /// Stripe.
    Stripe,
    /// Anything else.
    Other,
}

impl PaymentMethod {
    /// Returns the snake_case method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Check => "check",
            Self::BankTransfer => "bank_transfer",
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::Paypal => "paypal",
            Self::Stripe => "stripe",
            Self::Other => "other",
        }
    }

    /// Returns true if payments made this way are settled on receipt.
    ///
    /// Cash, check and credit card always are; `extra` adds configured methods
    /// by name.
    #[must_use]
    pub fn settles_instantly(&self, extra: &[String]) -> bool {
        matches!(self, Self::Cash | Self::Check | Self::CreditCard)
            || extra
                .iter()
                .any(|m| m.trim().eq_ignore_ascii_case(self.as_str()))
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The slice of a payment row the engine's rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentView {
    /// Payment ID.
    pub id: PaymentId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Payment currency.
    pub currency: CurrencyCode,
    /// Received amount.
    pub amount: Decimal,
    /// Current status.
    pub status: PaymentStatus,
}

/// Input for creating a payment.
#[derive(Debug, Clone)]
pub struct CreatePaymentInput {
    /// Paying customer.
    pub customer_id: CustomerId,
    /// Received amount, must be positive.
    pub amount: Decimal,
    /// Payment currency.
    pub currency: CurrencyCode,
    /// How the customer paid.
    pub payment_method: PaymentMethod,
    /// Date the money was received.
    pub payment_date: NaiveDate,
    /// Explicit payment number; generated when absent.
    pub payment_number: Option<String>,
    /// External reference (bank reference, check number).
    pub reference_number: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Allocate `invoice_allocations` in the same transaction.
    pub auto_allocate: bool,
    /// Allocations applied in the given order when `auto_allocate` is set.
    pub invoice_allocations: Vec<AllocationRequest>,
}

/// Fields that may change on an existing payment. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdatePaymentInput {
    /// New amount; must stay positive and cover active allocations.
    pub amount: Option<Decimal>,
    /// New payment method.
    pub payment_method: Option<PaymentMethod>,
    /// New payment date.
    pub payment_date: Option<NaiveDate>,
    /// New payment number.
    pub payment_number: Option<String>,
    /// New reference number.
    pub reference_number: Option<String>,
    /// New notes.
    pub notes: Option<String>,
}

impl UpdatePaymentInput {
    /// Returns true if no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.payment_method.is_none()
            && self.payment_date.is_none()
            && self.payment_number.is_none()
            && self.reference_number.is_none()
            && self.notes.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Completed, true)]
    #[case(PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Cancelled, false)]
    fn test_can_be_allocated(#[case] status: PaymentStatus, #[case] expected: bool) {
        assert_eq!(status.can_be_allocated(), expected);
    }

    #[rstest]
    #[case(PaymentMethod::Cash, true)]
    #[case(PaymentMethod::Check, true)]
    #[case(PaymentMethod::CreditCard, true)]
    #[case(PaymentMethod::BankTransfer, false)]
    #[case(PaymentMethod::DebitCard, false)]
    #[case(PaymentMethod::Paypal, false)]
    #[case(PaymentMethod::Stripe, false)]
    #[case(PaymentMethod::Other, false)]
    fn test_default_instant_settlement(#[case] method: PaymentMethod, #[case] expected: bool) {
        assert_eq!(method.settles_instantly(&[]), expected);
    }

    #[test]
    fn test_configured_instant_settlement() {
        let extra = vec!["Stripe".to_string(), " paypal ".to_string()];
        assert!(PaymentMethod::Stripe.settles_instantly(&extra));
        assert!(PaymentMethod::Paypal.settles_instantly(&extra));
        assert!(!PaymentMethod::BankTransfer.settles_instantly(&extra));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PaymentStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(PaymentMethod::BankTransfer.to_string(), "bank_transfer");
    }

    #[test]
    fn test_update_input_is_empty() {
        assert!(UpdatePaymentInput::default().is_empty());
        let input = UpdatePaymentInput {
            notes: Some("late".to_string()),
            ..Default::default()
        };
        assert!(!input.is_empty());
    }
}
