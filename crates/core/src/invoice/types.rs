//! Invoice domain types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_shared::types::{CompanyId, CurrencyCode, InvoiceId};

/// Document status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Being drafted, not yet issued.
    Draft,
    /// Sent to the customer.
    Sent,
    /// Posted to the ledger.
    Posted,
    /// Marked paid.
    Paid,
    /// Cancelled; never accepts allocations.
    Cancelled,
}

impl InvoiceStatus {
    /// Returns true if manual allocations may target the invoice.
    #[must_use]
    pub fn accepts_allocations(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Returns true if automatic allocation may pick the invoice.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Draft | Self::Cancelled)
    }
}

/// Settlement status of an invoice, derived by the balance calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePaymentStatus {
    /// Nothing applied and not past due.
    Unpaid,
    /// Something applied, balance remains.
    PartiallyPaid,
    /// Balance settled within tolerance.
    Paid,
    /// Past due with nothing applied.
    Overdue,
}

impl InvoicePaymentStatus {
    /// Returns the snake_case status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for InvoicePaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line item as seen by the calculator. Tax is computed upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    /// Quantity.
    pub quantity: Decimal,
    /// Unit price.
    pub unit_price: Decimal,
    /// Discount on the line.
    pub discount_amount: Decimal,
    /// Tax on the line.
    pub tax_amount: Decimal,
}

impl LineItem {
    /// `quantity * unit_price - discount`.
    #[must_use]
    pub fn net_amount(&self) -> Decimal {
        self.quantity * self.unit_price - self.discount_amount
    }
}

/// The slice of an invoice row the allocation rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceView {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Owning company.
    pub company_id: CompanyId,
    /// Invoice currency.
    pub currency: CurrencyCode,
    /// Document status.
    pub status: InvoiceStatus,
    /// Current balance due.
    pub balance_due: Decimal,
}

/// An open invoice offered to an allocation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInvoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Due date.
    pub due_date: NaiveDate,
    /// Current balance due.
    pub balance_due: Decimal,
    /// Stored settlement status is overdue.
    pub overdue: bool,
}

impl OpenInvoice {
    /// Days past due as of `today`, zero when not yet due.
    #[must_use]
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }
}

/// Persisted invoice state the calculator starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceState {
    /// Document status.
    pub status: InvoiceStatus,
    /// Stored subtotal.
    pub subtotal: Decimal,
    /// Stored tax amount.
    pub tax_amount: Decimal,
    /// Stored total.
    pub total_amount: Decimal,
    /// Due date.
    pub due_date: NaiveDate,
    /// Stored settlement status.
    pub payment_status: InvoicePaymentStatus,
    /// When the invoice last became paid.
    pub paid_at: Option<DateTime<Utc>>,
    /// When the invoice last became overdue.
    pub overdue_at: Option<DateTime<Utc>>,
}

/// Everything applied against an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceInputs {
    /// Line items; empty means stored totals are authoritative.
    pub line_items: Vec<LineItem>,
    /// Sum of active allocations.
    pub payments_applied: Decimal,
    /// Sum of active credit-note applications.
    pub credits_applied: Decimal,
}

/// Recomputed invoice figures, written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceBalance {
    /// Subtotal.
    pub subtotal: Decimal,
    /// Tax amount.
    pub tax_amount: Decimal,
    /// Total amount.
    pub total_amount: Decimal,
    /// Sum of active allocations.
    pub paid_amount: Decimal,
    /// Sum of active credit-note applications.
    pub credited_amount: Decimal,
    /// `max(0, total - paid - credited)`.
    pub balance_due: Decimal,
    /// Derived settlement status.
    pub payment_status: InvoicePaymentStatus,
    /// Set while paid.
    pub paid_at: Option<DateTime<Utc>>,
    /// Set on transition into overdue, kept afterwards.
    pub overdue_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(InvoiceStatus::Draft, true, false)]
    #[case(InvoiceStatus::Sent, true, true)]
    #[case(InvoiceStatus::Posted, true, true)]
    #[case(InvoiceStatus::Paid, true, true)]
    #[case(InvoiceStatus::Cancelled, false, false)]
    fn test_invoice_status_openness(
        #[case] status: InvoiceStatus,
        #[case] accepts: bool,
        #[case] open: bool,
    ) {
        assert_eq!(status.accepts_allocations(), accepts);
        assert_eq!(status.is_open(), open);
    }

    #[test]
    fn test_line_item_net_amount() {
        let item = LineItem {
            quantity: dec!(3),
            unit_price: dec!(19.99),
            discount_amount: dec!(5),
            tax_amount: dec!(1.20),
        };
        assert_eq!(item.net_amount(), dec!(54.97));
    }

    #[test]
    fn test_days_overdue() {
        let invoice = OpenInvoice {
            id: InvoiceId::new(),
            due_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            balance_due: dec!(10),
            overdue: false,
        };
        let before = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(invoice.days_overdue(before), 0);
        assert_eq!(invoice.days_overdue(after), 5);
    }
}
