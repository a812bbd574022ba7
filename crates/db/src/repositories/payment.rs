//! Payment repository: the payment lifecycle.
//!
//! Every operation runs in one company-scoped transaction, locks the payment
//! row before anything else and writes exactly one audit entry.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
};
use serde_json::json;
use settle_core::ExecutionContext;
use settle_core::allocation::{AllocationMethod, EntryKind};
use settle_core::audit::{AuditAction, AuditEntry};
use settle_core::error::EngineError;
use settle_core::numbering::{DocumentKind, normalize_prefix};
use settle_core::payment::{
    CreatePaymentInput, PaymentLifecycle, PaymentStatus, UpdatePaymentInput,
};
use settle_shared::EngineConfig;
use settle_shared::types::{InvoiceId, PaymentId};
use uuid::Uuid;

use super::ledger::{self, EntrySource};
use super::{audit, numbering};
use crate::entities::{payment_allocations, payments};
use crate::error::map_db_err;
use crate::scope::CompanyScope;

/// Payment with the allocation entries created alongside it.
#[derive(Debug, Clone)]
pub struct PaymentWithAllocations {
    /// The payment.
    pub payment: payments::Model,
    /// Entries created in the same transaction, in request order.
    pub allocations: Vec<payment_allocations::Model>,
}

/// Payment repository.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    db: DatabaseConnection,
    config: EngineConfig,
}

impl PaymentRepository {
    /// Creates a new payment repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Records a received payment.
    ///
    /// Cash, check and credit card payments (plus any configured instant
    /// methods) start `completed`, everything else `pending`. A payment number
    /// `PAY-{year}-{seq}` is generated from the payment date when none is
    /// given. With `auto_allocate` set, `invoice_allocations` are applied in
    /// the same transaction, in the order given.
    ///
    /// # Errors
    ///
    /// - `NegativeAmount` unless the amount is positive
    /// - any allocation error when allocating in the same call
    pub async fn create_payment(
        &self,
        ctx: &dyn ExecutionContext,
        input: CreatePaymentInput,
    ) -> Result<PaymentWithAllocations, EngineError> {
        let amount = PaymentLifecycle::validate_new(&input)?;
        let status = PaymentLifecycle::initial_status(
            input.payment_method,
            &self.config.instant_settlement_methods,
        );

        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::CreatePayment).await?;
        let txn = scope.transaction();
        let company_id = ctx.company_id();
        let now = Utc::now();

        let payment_number = match input.payment_number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => number.to_string(),
            _ => {
                let prefix = normalize_prefix(&self.config.payment_prefix)?;
                numbering::generate_in(
                    txn,
                    company_id,
                    DocumentKind::Payment,
                    &prefix,
                    input.payment_date.year(),
                )
                .await?
            }
        };

        let payment = payments::ActiveModel {
            id: Set(Uuid::now_v7()),
            company_id: Set(company_id.into_inner()),
            customer_id: Set(input.customer_id.into_inner()),
            payment_number: Set(payment_number),
            currency: Set(input.currency.to_string()),
            amount: Set(amount),
            status: Set(status.into()),
            payment_method: Set(input.payment_method.into()),
            payment_date: Set(input.payment_date),
            reference_number: Set(input.reference_number.clone()),
            notes: Set(input.notes.clone()),
            completed_at: Set((status == PaymentStatus::Completed).then(|| now.fixed_offset())),
            created_by_user_id: Set(ctx.acting_user_id().map(Into::into)),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(map_db_err)?;

        let allocations = if input.auto_allocate && !input.invoice_allocations.is_empty() {
            ledger::apply_allocations(
                txn,
                ctx,
                &payment,
                &input.invoice_allocations,
                &EntrySource::manual(None),
                now,
            )
            .await?
            .entries
        } else {
            Vec::new()
        };

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::CreatePayment,
                json!({
                    "payment_id": payment.id,
                    "payment_number": payment.payment_number,
                    "amount": payment.amount,
                    "currency": payment.currency,
                    "payment_method": input.payment_method.as_str(),
                    "status": status.as_str(),
                    "allocations_count": allocations.len(),
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            payment_id = %payment.id,
            payment_number = %payment.payment_number,
            amount = %payment.amount,
            status = %status,
            "Payment created"
        );

        Ok(PaymentWithAllocations {
            payment,
            allocations,
        })
    }

    /// Marks a pending payment completed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPaymentTransition` unless the payment is pending.
    pub async fn complete_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        processor_reference: Option<String>,
    ) -> Result<payments::Model, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::CompletePayment)
                .await?;
        let txn = scope.transaction();
        let now = Utc::now();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let status = PaymentLifecycle::complete(payment.status.into())?;

        let mut active: payments::ActiveModel = payment.into();
        active.status = Set(status.into());
        active.completed_at = Set(Some(now.fixed_offset()));
        if processor_reference.is_some() {
            active.processor_reference = Set(processor_reference.clone());
        }
        active.updated_at = Set(now.fixed_offset());
        let payment = active.update(txn).await.map_err(map_db_err)?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::CompletePayment,
                json!({
                    "payment_id": payment.id,
                    "processor_reference": processor_reference,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(payment_id = %payment.id, "Payment completed");
        Ok(payment)
    }

    /// Updates a payment's editable fields.
    ///
    /// # Errors
    ///
    /// - `CannotModifyCancelled` on cancelled payments
    /// - `NegativeAmount`, `AmountBelowAllocated` for an unusable new amount
    pub async fn update_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        input: UpdatePaymentInput,
    ) -> Result<payments::Model, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::UpdatePayment).await?;
        let txn = scope.transaction();
        let now = Utc::now();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let view = ledger::payment_view(&payment)?;
        let allocated = ledger::active_payment_total(txn, payment.id).await?;
        let new_amount = PaymentLifecycle::validate_update(&view, &input, allocated)?;

        let mut changed = Vec::new();
        let mut active: payments::ActiveModel = payment.into();
        if let Some(amount) = new_amount {
            active.amount = Set(amount);
            changed.push("amount");
        }
        if let Some(method) = input.payment_method {
            active.payment_method = Set(method.into());
            changed.push("payment_method");
        }
        if let Some(date) = input.payment_date {
            active.payment_date = Set(date);
            changed.push("payment_date");
        }
        if let Some(number) = input.payment_number.as_deref().map(str::trim) {
            if !number.is_empty() {
                active.payment_number = Set(number.to_string());
                changed.push("payment_number");
            }
        }
        if let Some(reference) = input.reference_number.clone() {
            active.reference_number = Set(Some(reference));
            changed.push("reference_number");
        }
        if let Some(notes) = input.notes.clone() {
            active.notes = Set(Some(notes));
            changed.push("notes");
        }
        active.updated_at = Set(now.fixed_offset());
        let payment = active.update(txn).await.map_err(map_db_err)?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::UpdatePayment,
                json!({
                    "payment_id": payment.id,
                    "changed_fields": changed,
                    "amount": payment.amount,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(payment_id = %payment.id, fields = ?changed, "Payment updated");
        Ok(payment)
    }

    /// Hard-deletes a payment with no active entries. Reversed entries go with it.
    ///
    /// # Errors
    ///
    /// Returns `HasActiveAllocations` while any entry is active.
    pub async fn delete_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
    ) -> Result<bool, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::DeletePayment).await?;
        let txn = scope.transaction();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let active_entries = ledger::active_payment_entries(txn, payment.id).await?;
        PaymentLifecycle::ensure_deletable(payment_id, active_entries)?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::DeletePayment,
                json!({
                    "payment_id": payment.id,
                    "payment_number": payment.payment_number,
                    "amount": payment.amount,
                }),
            ),
        )
        .await?;

        let result = payment.delete(txn).await.map_err(map_db_err)?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(payment_id = %payment_id, "Payment deleted");
        Ok(result.rows_affected == 1)
    }

    /// Voids a payment. Its allocations stay in place.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotVoidable` for cancelled and failed payments.
    pub async fn void_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<payments::Model, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::VoidPayment).await?;
        let txn = scope.transaction();
        let now = Utc::now();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let status = PaymentLifecycle::void(&ledger::payment_view(&payment)?)?;

        let mut active: payments::ActiveModel = payment.into();
        active.status = Set(status.into());
        active.voided_at = Set(Some(now.fixed_offset()));
        active.void_reason = Set(Some(reason.to_string()));
        active.updated_at = Set(now.fixed_offset());
        let payment = active.update(txn).await.map_err(map_db_err)?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::VoidPayment,
                json!({ "payment_id": payment.id, "reason": reason }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(payment_id = %payment.id, reason, "Payment voided");
        Ok(payment)
    }

    /// Voids a payment and reverses every active allocation, recalculating
    /// the affected invoices. Refund entries are left as they are.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotVoidable` for cancelled and failed payments.
    pub async fn void_payment_and_reverse_allocations(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<payments::Model, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::VoidAndReverse)
                .await?;
        let txn = scope.transaction();
        let now = Utc::now();
        let company_id = ctx.company_id();

        let payment = ledger::lock_payment(txn, company_id, payment_id).await?;
        let status = PaymentLifecycle::void(&ledger::payment_view(&payment)?)?;

        let entries = ledger::active_allocations(txn, payment.id).await?;
        let mut invoice_ids: Vec<InvoiceId> = entries
            .iter()
            .filter_map(|entry| entry.invoice_id.map(InvoiceId::from_uuid))
            .collect();
        invoice_ids.sort_unstable();
        invoice_ids.dedup();
        let invoices = ledger::lock_invoices(txn, company_id, &invoice_ids).await?;

        let reversed_count = entries.len();
        let mut reversed_total = Decimal::ZERO;
        for entry in entries {
            reversed_total += entry.allocated_amount;
            ledger::reverse_entry(txn, entry, Some(reason.to_string()), now).await?;
        }
        for invoice in invoices {
            ledger::recalculate_locked(txn, invoice, now).await?;
        }

        let mut active: payments::ActiveModel = payment.into();
        active.status = Set(status.into());
        active.voided_at = Set(Some(now.fixed_offset()));
        active.void_reason = Set(Some(reason.to_string()));
        active.updated_at = Set(now.fixed_offset());
        let payment = active.update(txn).await.map_err(map_db_err)?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::VoidAndReverse,
                json!({
                    "payment_id": payment.id,
                    "reason": reason,
                    "reversed_count": reversed_count,
                    "reversed_total": reversed_total,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            payment_id = %payment.id,
            reversed = reversed_count,
            total = %reversed_total,
            "Payment voided and allocations reversed"
        );
        Ok(payment)
    }

    /// Refunds part of a completed payment's unallocated amount.
    ///
    /// Writes one refund entry (an entry with no invoice). The result is a list
    /// so callers handle single and split refunds alike.
    ///
    /// # Errors
    ///
    /// - `PaymentNotRefundable` unless the payment is completed
    /// - `NegativeAmount`, `OverRefund` for an unusable amount
    pub async fn refund_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Vec<payment_allocations::Model>, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::RefundPayment).await?;
        let txn = scope.transaction();
        let now = Utc::now();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let unallocated = ledger::unallocated_amount(txn, &payment).await?;
        let amount =
            PaymentLifecycle::validate_refund(&ledger::payment_view(&payment)?, amount, unallocated)?;

        let refund = payment_allocations::ActiveModel {
            id: Set(Uuid::now_v7()),
            company_id: Set(payment.company_id),
            payment_id: Set(payment.id),
            invoice_id: Set(None),
            entry_kind: Set(EntryKind::Refund.into()),
            allocated_amount: Set(amount),
            allocation_date: Set(now.date_naive()),
            allocation_method: Set(AllocationMethod::Manual.into()),
            notes: Set(Some(reason.to_string())),
            created_by_user_id: Set(ctx.acting_user_id().map(Into::into)),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(map_db_err)?;

        ledger::ensure_not_over_allocated(txn, &payment).await?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::RefundPayment,
                json!({
                    "payment_id": payment.id,
                    "refund_amount": amount,
                    "reason": reason,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(payment_id = %payment.id, amount = %amount, "Payment refunded");
        Ok(vec![refund])
    }

    /// Finds a payment in the caller's company.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
    ) -> Result<Option<payments::Model>, EngineError> {
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let payment = payments::Entity::find_by_id(payment_id.into_inner())
            .filter(payments::Column::CompanyId.eq(ctx.company_id().into_inner()))
            .one(scope.transaction())
            .await
            .map_err(map_db_err)?;
        scope.commit().await.map_err(map_db_err)?;
        Ok(payment)
    }

    /// Unallocated amount of a payment: its amount less active entries.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` if the payment is not in the caller's company.
    pub async fn unallocated_amount(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
    ) -> Result<Decimal, EngineError> {
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let payment = payments::Entity::find_by_id(payment_id.into_inner())
            .filter(payments::Column::CompanyId.eq(ctx.company_id().into_inner()))
            .one(scope.transaction())
            .await
            .map_err(map_db_err)?
            .ok_or(EngineError::PaymentNotFound(payment_id))?;
        let unallocated = ledger::unallocated_amount(scope.transaction(), &payment).await?;
        scope.commit().await.map_err(map_db_err)?;
        Ok(unallocated)
    }
}
