//! Payment lifecycle rules.
//!
//! State transitions and preconditions for creating, completing, updating,
//! deleting, voiding and refunding payments. The database layer calls these on
//! locked rows and persists whatever they return.

use rust_decimal::Decimal;
use settle_shared::types::{PaymentId, round_amount};

use super::types::{CreatePaymentInput, PaymentMethod, PaymentStatus, PaymentView, UpdatePaymentInput};
use crate::error::EngineError;

/// Stateless payment lifecycle service.
pub struct PaymentLifecycle;

impl PaymentLifecycle {
    /// Status a new payment starts in.
    #[must_use]
    pub fn initial_status(method: PaymentMethod, instant_methods: &[String]) -> PaymentStatus {
        if method.settles_instantly(instant_methods) {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Pending
        }
    }

    /// Validates a new payment, returning the amount at storage precision.
    ///
    /// # Errors
    ///
    /// Returns `NegativeAmount` unless the amount is positive.
    pub fn validate_new(input: &CreatePaymentInput) -> Result<Decimal, EngineError> {
        let amount = round_amount(input.amount);
        if amount <= Decimal::ZERO {
            return Err(EngineError::NegativeAmount);
        }
        Ok(amount)
    }

    /// Pending to completed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPaymentTransition` from any other status.
    pub fn complete(current: PaymentStatus) -> Result<PaymentStatus, EngineError> {
        match current {
            PaymentStatus::Pending => Ok(PaymentStatus::Completed),
            _ => Err(EngineError::InvalidPaymentTransition {
                from: current,
                to: PaymentStatus::Completed,
            }),
        }
    }

    /// Validates an update, returning the new amount if one was given.
    ///
    /// # Errors
    ///
    /// - `CannotModifyCancelled` on cancelled payments
    /// - `NegativeAmount` if the new amount is not positive
    /// - `AmountBelowAllocated` if it would not cover active entries
    pub fn validate_update(
        payment: &PaymentView,
        input: &UpdatePaymentInput,
        allocated: Decimal,
    ) -> Result<Option<Decimal>, EngineError> {
        if payment.status == PaymentStatus::Cancelled {
            return Err(EngineError::CannotModifyCancelled(payment.id));
        }

        let Some(amount) = input.amount else {
            return Ok(None);
        };
        let amount = round_amount(amount);
        if amount <= Decimal::ZERO {
            return Err(EngineError::NegativeAmount);
        }
        if amount < allocated {
            return Err(EngineError::AmountBelowAllocated { amount, allocated });
        }
        Ok(Some(amount))
    }

    /// A payment may be hard-deleted only with no active entries.
    ///
    /// # Errors
    ///
    /// Returns `HasActiveAllocations` otherwise.
    pub fn ensure_deletable(payment_id: PaymentId, active_entries: u64) -> Result<(), EngineError> {
        if active_entries == 0 {
            Ok(())
        } else {
            Err(EngineError::HasActiveAllocations(payment_id))
        }
    }

    /// Any status except cancelled and failed may be voided.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotVoidable` for cancelled and failed payments.
    pub fn void(payment: &PaymentView) -> Result<PaymentStatus, EngineError> {
        match payment.status {
            PaymentStatus::Pending | PaymentStatus::Completed => Ok(PaymentStatus::Cancelled),
            status => Err(EngineError::PaymentNotVoidable {
                payment_id: payment.id,
                status,
            }),
        }
    }

    /// Validates a refund, returning the amount at storage precision.
    ///
    /// # Errors
    ///
    /// - `PaymentNotRefundable` unless the payment is completed
    /// - `NegativeAmount` unless the amount is positive
    /// - `OverRefund` if the amount exceeds the unallocated amount
    pub fn validate_refund(
        payment: &PaymentView,
        amount: Decimal,
        unallocated: Decimal,
    ) -> Result<Decimal, EngineError> {
        if payment.status != PaymentStatus::Completed {
            return Err(EngineError::PaymentNotRefundable {
                payment_id: payment.id,
                status: payment.status,
            });
        }

        let amount = round_amount(amount);
        if amount <= Decimal::ZERO {
            return Err(EngineError::NegativeAmount);
        }
        if amount > unallocated {
            return Err(EngineError::OverRefund {
                requested: amount,
                available: unallocated,
            });
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use settle_shared::types::{CompanyId, CustomerId};

    fn view(status: PaymentStatus) -> PaymentView {
        PaymentView {
            id: PaymentId::new(),
            company_id: CompanyId::new(),
            customer_id: CustomerId::new(),
            currency: "USD".parse().unwrap(),
            amount: dec!(100),
            status,
        }
    }

    fn create_input(amount: Decimal) -> CreatePaymentInput {
        CreatePaymentInput {
            customer_id: CustomerId::new(),
            amount,
            currency: "USD".parse().unwrap(),
            payment_method: PaymentMethod::BankTransfer,
            payment_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            payment_number: None,
            reference_number: None,
            notes: None,
            auto_allocate: false,
            invoice_allocations: vec![],
        }
    }

    #[test]
    fn test_initial_status() {
        assert_eq!(
            PaymentLifecycle::initial_status(PaymentMethod::Cash, &[]),
            PaymentStatus::Completed
        );
        assert_eq!(
            PaymentLifecycle::initial_status(PaymentMethod::BankTransfer, &[]),
            PaymentStatus::Pending
        );
        assert_eq!(
            PaymentLifecycle::initial_status(
                PaymentMethod::BankTransfer,
                &["bank_transfer".to_string()]
            ),
            PaymentStatus::Completed
        );
    }

    #[rstest]
    #[case(dec!(100), true)]
    #[case(dec!(0.0001), true)]
    #[case(dec!(0), false)]
    #[case(dec!(0.00001), false)]
    #[case(dec!(-5), false)]
    fn test_validate_new_amount(#[case] amount: Decimal, #[case] ok: bool) {
        assert_eq!(PaymentLifecycle::validate_new(&create_input(amount)).is_ok(), ok);
    }

    #[rstest]
    #[case(PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Completed, false)]
    #[case(PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Cancelled, false)]
    fn test_complete_transition(#[case] from: PaymentStatus, #[case] ok: bool) {
        let result = PaymentLifecycle::complete(from);
        assert_eq!(result.is_ok(), ok);
        if !ok {
            assert!(matches!(
                result,
                Err(EngineError::InvalidPaymentTransition { .. })
            ));
        }
    }

    #[test]
    fn test_update_rules() {
        let completed = view(PaymentStatus::Completed);
        let raise = UpdatePaymentInput {
            amount: Some(dec!(150)),
            ..Default::default()
        };
        assert_eq!(
            PaymentLifecycle::validate_update(&completed, &raise, dec!(80)).unwrap(),
            Some(dec!(150))
        );

        let shrink = UpdatePaymentInput {
            amount: Some(dec!(50)),
            ..Default::default()
        };
        assert!(matches!(
            PaymentLifecycle::validate_update(&completed, &shrink, dec!(80)),
            Err(EngineError::AmountBelowAllocated { .. })
        ));

        let zero = UpdatePaymentInput {
            amount: Some(Decimal::ZERO),
            ..Default::default()
        };
        assert!(matches!(
            PaymentLifecycle::validate_update(&completed, &zero, Decimal::ZERO),
            Err(EngineError::NegativeAmount)
        ));

        let notes = UpdatePaymentInput {
            notes: Some("x".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            PaymentLifecycle::validate_update(&view(PaymentStatus::Cancelled), &notes, dec!(0)),
            Err(EngineError::CannotModifyCancelled(_))
        ));
    }

    #[test]
    fn test_delete_requires_no_active_entries() {
        let id = PaymentId::new();
        assert!(PaymentLifecycle::ensure_deletable(id, 0).is_ok());
        assert!(matches!(
            PaymentLifecycle::ensure_deletable(id, 2),
            Err(EngineError::HasActiveAllocations(p)) if p == id
        ));
    }

    #[rstest]
    #[case(PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Completed, true)]
    #[case(PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Cancelled, false)]
    fn test_void(#[case] status: PaymentStatus, #[case] ok: bool) {
        let result = PaymentLifecycle::void(&view(status));
        assert_eq!(result.is_ok(), ok);
        if ok {
            assert_eq!(result.unwrap(), PaymentStatus::Cancelled);
        }
    }

    #[test]
    fn test_refund_rules() {
        let completed = view(PaymentStatus::Completed);
        assert_eq!(
            PaymentLifecycle::validate_refund(&completed, dec!(30), dec!(40)).unwrap(),
            dec!(30)
        );
        assert!(matches!(
            PaymentLifecycle::validate_refund(&completed, dec!(50), dec!(40)),
            Err(EngineError::OverRefund { .. })
        ));
        assert!(matches!(
            PaymentLifecycle::validate_refund(&completed, dec!(-1), dec!(40)),
            Err(EngineError::NegativeAmount)
        ));
        assert!(matches!(
            PaymentLifecycle::validate_refund(&view(PaymentStatus::Pending), dec!(10), dec!(40)),
            Err(EngineError::PaymentNotRefundable { .. })
        ));
    }
}
