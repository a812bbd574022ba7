//! Invoice balance calculation.
//!
//! The calculator is the only code that derives `balance_due` and
//! `payment_status`. It is a pure function of the invoice's line items, its
//! active allocations and credits, and the clock, so running it twice on the
//! same state yields the same figures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use settle_shared::types::{EPSILON, round_amount};

use super::types::{BalanceInputs, InvoiceBalance, InvoicePaymentStatus, InvoiceState, InvoiceStatus};

/// Stateless invoice balance calculator.
pub struct InvoiceBalanceCalculator;

impl InvoiceBalanceCalculator {
    /// Recomputes totals, balance and settlement status.
    ///
    /// - Totals come from line items when there are any, otherwise the stored
    ///   totals stand.
    /// - `balance_due = max(0, total - payments - credits)`.
    /// - Status precedence: paid, partially paid, overdue, unpaid.
    #[must_use]
    pub fn recalculate(
        state: &InvoiceState,
        inputs: &BalanceInputs,
        now: DateTime<Utc>,
    ) -> InvoiceBalance {
        let (subtotal, tax_amount, total_amount) = Self::totals(state, inputs);

        let paid_amount = round_amount(inputs.payments_applied);
        let credited_amount = round_amount(inputs.credits_applied);
        let balance_due = (total_amount - paid_amount - credited_amount).max(Decimal::ZERO);

        let payment_status = Self::payment_status(state, total_amount, balance_due, now);

        let paid_at = match payment_status {
            InvoicePaymentStatus::Paid if state.payment_status == InvoicePaymentStatus::Paid => {
                state.paid_at.or(Some(now))
            }
            InvoicePaymentStatus::Paid => Some(now),
            _ => None,
        };

        let overdue_at = match payment_status {
            InvoicePaymentStatus::Overdue
                if state.payment_status != InvoicePaymentStatus::Overdue
                    || state.overdue_at.is_none() =>
            {
                Some(now)
            }
            _ => state.overdue_at,
        };

        InvoiceBalance {
            subtotal,
            tax_amount,
            total_amount,
            paid_amount,
            credited_amount,
            balance_due,
            payment_status,
            paid_at,
            overdue_at,
        }
    }

    /// Returns `(subtotal, tax, total)`.
    fn totals(state: &InvoiceState, inputs: &BalanceInputs) -> (Decimal, Decimal, Decimal) {
        if inputs.line_items.is_empty() {
            return (
                round_amount(state.subtotal),
                round_amount(state.tax_amount),
                round_amount(state.total_amount),
            );
        }

        let subtotal = round_amount(inputs.line_items.iter().map(|i| i.net_amount()).sum());
        let tax_amount = round_amount(inputs.line_items.iter().map(|i| i.tax_amount).sum());
        (subtotal, tax_amount, subtotal + tax_amount)
    }

    fn payment_status(
        state: &InvoiceState,
        total_amount: Decimal,
        balance_due: Decimal,
        now: DateTime<Utc>,
    ) -> InvoicePaymentStatus {
        if balance_due <= EPSILON || total_amount <= EPSILON {
            InvoicePaymentStatus::Paid
        } else if balance_due > Decimal::ZERO && balance_due < total_amount - EPSILON {
            InvoicePaymentStatus::PartiallyPaid
        } else if state.due_date < now.date_naive() && state.status != InvoiceStatus::Draft {
            InvoicePaymentStatus::Overdue
        } else {
            InvoicePaymentStatus::Unpaid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::types::LineItem;
    use chrono::{NaiveDate, TimeZone};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn state(total: Decimal, due: NaiveDate) -> InvoiceState {
        InvoiceState {
            status: InvoiceStatus::Sent,
            subtotal: total,
            tax_amount: Decimal::ZERO,
            total_amount: total,
            due_date: due,
            payment_status: InvoicePaymentStatus::Unpaid,
            paid_at: None,
            overdue_at: None,
        }
    }

    fn future() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    fn past() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
    }

    fn applied(payments: Decimal, credits: Decimal) -> BalanceInputs {
        BalanceInputs {
            line_items: vec![],
            payments_applied: payments,
            credits_applied: credits,
        }
    }

    #[rstest]
    #[case(dec!(0), dec!(0), dec!(500), InvoicePaymentStatus::Unpaid)]
    #[case(dec!(200), dec!(0), dec!(300), InvoicePaymentStatus::PartiallyPaid)]
    #[case(dec!(300), dec!(200), dec!(0), InvoicePaymentStatus::Paid)]
    #[case(dec!(499.995), dec!(0), dec!(0.005), InvoicePaymentStatus::Paid)]
    #[case(dec!(400), dec!(200), dec!(0), InvoicePaymentStatus::Paid)]
    fn test_balance_and_status(
        #[case] payments: Decimal,
        #[case] credits: Decimal,
        #[case] expected_balance: Decimal,
        #[case] expected_status: InvoicePaymentStatus,
    ) {
        let result = InvoiceBalanceCalculator::recalculate(
            &state(dec!(500), future()),
            &applied(payments, credits),
            now(),
        );
        assert_eq!(result.balance_due, expected_balance);
        assert_eq!(result.payment_status, expected_status);
    }

    #[test]
    fn test_overdue_when_past_due_and_untouched() {
        let result =
            InvoiceBalanceCalculator::recalculate(&state(dec!(500), past()), &applied(dec!(0), dec!(0)), now());
        assert_eq!(result.payment_status, InvoicePaymentStatus::Overdue);
        assert_eq!(result.overdue_at, Some(now()));
    }

    #[test]
    fn test_partially_paid_takes_precedence_over_overdue() {
        let result = InvoiceBalanceCalculator::recalculate(
            &state(dec!(500), past()),
            &applied(dec!(100), dec!(0)),
            now(),
        );
        assert_eq!(result.payment_status, InvoicePaymentStatus::PartiallyPaid);
    }

    #[test]
    fn test_draft_is_never_overdue() {
        let mut draft = state(dec!(500), past());
        draft.status = InvoiceStatus::Draft;
        let result =
            InvoiceBalanceCalculator::recalculate(&draft, &applied(dec!(0), dec!(0)), now());
        assert_eq!(result.payment_status, InvoicePaymentStatus::Unpaid);
    }

    #[test]
    fn test_zero_total_is_paid() {
        let result = InvoiceBalanceCalculator::recalculate(
            &state(Decimal::ZERO, future()),
            &applied(dec!(0), dec!(0)),
            now(),
        );
        assert_eq!(result.payment_status, InvoicePaymentStatus::Paid);
        assert_eq!(result.balance_due, Decimal::ZERO);
    }

    #[test]
    fn test_line_items_drive_totals() {
        let inputs = BalanceInputs {
            line_items: vec![
                LineItem {
                    quantity: dec!(2),
                    unit_price: dec!(100),
                    discount_amount: dec!(10),
                    tax_amount: dec!(19),
                },
                LineItem {
                    quantity: dec!(1),
                    unit_price: dec!(50),
                    discount_amount: dec!(0),
                    tax_amount: dec!(5),
                },
            ],
            payments_applied: dec!(100),
            credits_applied: dec!(0),
        };
        let result = InvoiceBalanceCalculator::recalculate(&state(dec!(1), future()), &inputs, now());
        assert_eq!(result.subtotal, dec!(240));
        assert_eq!(result.tax_amount, dec!(24));
        assert_eq!(result.total_amount, dec!(264));
        assert_eq!(result.balance_due, dec!(164));
    }

    #[test]
    fn test_paid_at_kept_while_paid_and_cleared_after() {
        let earlier = Utc.with_ymd_and_hms(2025, 2, 15, 9, 0, 0).unwrap();
        let mut paid = state(dec!(500), future());
        paid.payment_status = InvoicePaymentStatus::Paid;
        paid.paid_at = Some(earlier);

        let still_paid =
            InvoiceBalanceCalculator::recalculate(&paid, &applied(dec!(500), dec!(0)), now());
        assert_eq!(still_paid.paid_at, Some(earlier));

        let reopened =
            InvoiceBalanceCalculator::recalculate(&paid, &applied(dec!(200), dec!(0)), now());
        assert_eq!(reopened.payment_status, InvoicePaymentStatus::PartiallyPaid);
        assert_eq!(reopened.paid_at, None);
    }

    #[test]
    fn test_overdue_at_kept_after_leaving_overdue() {
        let earlier = Utc.with_ymd_and_hms(2025, 2, 2, 0, 0, 0).unwrap();
        let mut overdue = state(dec!(500), past());
        overdue.payment_status = InvoicePaymentStatus::Overdue;
        overdue.overdue_at = Some(earlier);

        let again =
            InvoiceBalanceCalculator::recalculate(&overdue, &applied(dec!(0), dec!(0)), now());
        assert_eq!(again.overdue_at, Some(earlier));

        let paid =
            InvoiceBalanceCalculator::recalculate(&overdue, &applied(dec!(500), dec!(0)), now());
        assert_eq!(paid.payment_status, InvoicePaymentStatus::Paid);
        assert_eq!(paid.overdue_at, Some(earlier));
    }
}
