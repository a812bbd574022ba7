//! Property-based tests for the invoice balance calculator.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use settle_shared::types::EPSILON;

use super::balance::InvoiceBalanceCalculator;
use super::types::{BalanceInputs, InvoicePaymentStatus, InvoiceState, InvoiceStatus};

/// Strategy for amounts from 0.0000 to 100,000.0000.
fn amount() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

/// Strategy for a due date within 90 days either side of the fixed clock.
fn due_date() -> impl Strategy<Value = NaiveDate> {
    (-90i64..90i64).prop_map(|offset| clock().date_naive() + Duration::days(offset))
}

fn arb_status() -> impl Strategy<Value = InvoiceStatus> {
    prop_oneof![
        Just(InvoiceStatus::Draft),
        Just(InvoiceStatus::Sent),
        Just(InvoiceStatus::Posted),
    ]
}

fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

fn fresh_state(status: InvoiceStatus, total: Decimal, due: NaiveDate) -> InvoiceState {
    InvoiceState {
        status,
        subtotal: total,
        tax_amount: Decimal::ZERO,
        total_amount: total,
        due_date: due,
        payment_status: InvoicePaymentStatus::Unpaid,
        paid_at: None,
        overdue_at: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Balance due is always `max(0, total - payments - credits)`.
    #[test]
    fn prop_balance_formula(
        status in arb_status(),
        total in amount(),
        payments in amount(),
        credits in amount(),
        due in due_date(),
    ) {
        let inputs = BalanceInputs { line_items: vec![], payments_applied: payments, credits_applied: credits };
        let result = InvoiceBalanceCalculator::recalculate(&fresh_state(status, total, due), &inputs, clock());

        prop_assert_eq!(result.balance_due, (total - payments - credits).max(Decimal::ZERO));
        prop_assert!(result.balance_due >= Decimal::ZERO);
        prop_assert!(result.balance_due <= result.total_amount);
    }

    /// Recalculating from the calculator's own output changes nothing.
    #[test]
    fn prop_recalculate_is_idempotent(
        status in arb_status(),
        total in amount(),
        payments in amount(),
        due in due_date(),
    ) {
        let inputs = BalanceInputs { line_items: vec![], payments_applied: payments, credits_applied: Decimal::ZERO };
        let mut state = fresh_state(status, total, due);
        let first = InvoiceBalanceCalculator::recalculate(&state, &inputs, clock());

        state.payment_status = first.payment_status;
        state.paid_at = first.paid_at;
        state.overdue_at = first.overdue_at;
        let second = InvoiceBalanceCalculator::recalculate(&state, &inputs, clock() + Duration::hours(1));

        prop_assert_eq!(first, second);
    }

    /// Applying more money never takes a paid invoice out of paid.
    #[test]
    fn prop_paid_is_monotonic_in_payments(
        total in amount(),
        payments in amount(),
        extra in amount(),
        due in due_date(),
    ) {
        let state = fresh_state(InvoiceStatus::Sent, total, due);
        let before = InvoiceBalanceCalculator::recalculate(
            &state,
            &BalanceInputs { line_items: vec![], payments_applied: payments, credits_applied: Decimal::ZERO },
            clock(),
        );
        let after = InvoiceBalanceCalculator::recalculate(
            &state,
            &BalanceInputs { line_items: vec![], payments_applied: payments + extra, credits_applied: Decimal::ZERO },
            clock(),
        );

        if before.payment_status == InvoicePaymentStatus::Paid {
            prop_assert_eq!(after.payment_status, InvoicePaymentStatus::Paid);
        }
        prop_assert!(after.balance_due <= before.balance_due);
    }

    /// Status agrees with the balance it was derived from.
    #[test]
    fn prop_status_matches_balance(
        status in arb_status(),
        total in amount(),
        payments in amount(),
        due in due_date(),
    ) {
        let inputs = BalanceInputs { line_items: vec![], payments_applied: payments, credits_applied: Decimal::ZERO };
        let result = InvoiceBalanceCalculator::recalculate(&fresh_state(status, total, due), &inputs, clock());

        match result.payment_status {
            InvoicePaymentStatus::Paid => {
                prop_assert!(result.balance_due <= EPSILON || result.total_amount <= EPSILON);
                prop_assert!(result.paid_at.is_some());
            }
            InvoicePaymentStatus::PartiallyPaid => {
                prop_assert!(result.balance_due > EPSILON);
                prop_assert!(result.balance_due < result.total_amount - EPSILON);
            }
            InvoicePaymentStatus::Overdue => {
                prop_assert!(status != InvoiceStatus::Draft);
                prop_assert!(due < clock().date_naive());
                prop_assert!(result.overdue_at.is_some());
            }
            InvoicePaymentStatus::Unpaid => {
                prop_assert!(result.paid_at.is_none());
            }
        }
    }
}
