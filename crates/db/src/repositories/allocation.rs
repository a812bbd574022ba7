//! Allocation repository: manual and automatic allocation, reversal and the
//! customer balance summary.
//!
//! Every write locks payment rows first and then invoice rows, each in
//! ascending id order, so two calls against one payment serialize and can
//! never together allocate more than the payment amount.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde_json::json;
use settle_core::ExecutionContext;
use settle_core::allocation::{
    AllocationMethod, AllocationRequest, AllocationService, AllocationStrategy, BatchReversal,
    ReversalOutcome, ReversalResult, StrategyOptions, StrategyPlanner,
};
use settle_core::audit::{AuditAction, AuditEntry};
use settle_core::error::EngineError;
use settle_core::invoice::{
    CustomerBalanceSummary, InvoicePaymentStatus, OpenInvoice, OutstandingInvoice,
};
use settle_shared::EngineConfig;
use settle_shared::types::{
    AllocationId, CompanyId, CurrencyCode, CustomerId, InvoiceId, PaymentId,
};
use uuid::Uuid;

use super::audit;
use super::ledger::{self, EntrySource};
use crate::entities::{
    invoices, payment_allocations, payments,
    sea_orm_active_enums::{AllocationEntryKind, InvoiceStatus, PaymentStatus},
};
use crate::error::map_db_err;
use crate::scope::CompanyScope;

/// Allocation repository.
#[derive(Debug, Clone)]
pub struct AllocationRepository {
    db: DatabaseConnection,
    config: EngineConfig,
}

impl AllocationRepository {
    /// Creates a new allocation repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Applies a payment to invoices.
    ///
    /// All-or-nothing: either every request becomes an allocation entry and
    /// every touched invoice is recalculated, or nothing changes. Entries are
    /// returned in request order.
    ///
    /// # Errors
    ///
    /// - `EmptyRequest`, `NegativeAmount` for malformed requests
    /// - `PaymentNotFound` if the payment is not in the caller's company
    /// - `PaymentNotAllocatable` for cancelled/failed or fully allocated payments
    /// - `InvalidInvoice` for missing or foreign invoices
    /// - `OverAllocation`, `ExceedsInvoiceBalance`, `CurrencyMismatch`, `InvoiceNotOpen`
    /// - `LockTimeout` / `SerializationFailure` (retryable)
    pub async fn allocate(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        requests: &[AllocationRequest],
        note: Option<String>,
    ) -> Result<Vec<payment_allocations::Model>, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::Allocate).await?;
        let txn = scope.transaction();
        let now = Utc::now();

        let payment = ledger::lock_payment(txn, ctx.company_id(), payment_id).await?;
        let applied = ledger::apply_allocations(
            txn,
            ctx,
            &payment,
            requests,
            &EntrySource::manual(note),
            now,
        )
        .await?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::Allocate,
                json!({
                    "payment_id": payment.id,
                    "allocations_count": applied.entries.len(),
                    "total_allocated": applied.total,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            payment_id = %payment.id,
            allocations = applied.entries.len(),
            total = %applied.total,
            "Payment allocated"
        );

        Ok(applied.entries)
    }

    /// Allocates a payment across the customer's open invoices using `strategy`.
    ///
    /// Open means not draft or cancelled, in the payment's currency, with a
    /// positive balance. An empty plan is not an error; the audit entry is
    /// written either way.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate), plus `InvalidStrategyOptions`.
    pub async fn auto_allocate(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
        strategy: AllocationStrategy,
        options: &StrategyOptions,
    ) -> Result<Vec<payment_allocations::Model>, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::AutoAllocate).await?;
        let txn = scope.transaction();
        let now = Utc::now();
        let company_id = ctx.company_id();

        let payment = ledger::lock_payment(txn, company_id, payment_id).await?;
        let view = ledger::payment_view(&payment)?;
        if !view.status.can_be_allocated() {
            return Err(EngineError::PaymentNotAllocatable(payment_id));
        }

        let candidates: Vec<InvoiceId> = invoices::Entity::find()
            .filter(invoices::Column::CompanyId.eq(payment.company_id))
            .filter(invoices::Column::CustomerId.eq(payment.customer_id))
            .filter(invoices::Column::Currency.eq(payment.currency.as_str()))
            .filter(
                invoices::Column::Status.is_not_in([InvoiceStatus::Draft, InvoiceStatus::Cancelled]),
            )
            .filter(invoices::Column::BalanceDue.gt(Decimal::ZERO))
            .order_by_asc(invoices::Column::Id)
            .select_only()
            .column(invoices::Column::Id)
            .into_tuple::<Uuid>()
            .all(txn)
            .await
            .map_err(map_db_err)?
            .into_iter()
            .map(InvoiceId::from_uuid)
            .collect();

        // Plan from locked rows so balances cannot move underneath the plan.
        let locked = ledger::lock_invoices(txn, company_id, &candidates).await?;
        let open: Vec<OpenInvoice> = locked
            .iter()
            .map(|invoice| OpenInvoice {
                id: invoice.id.into(),
                due_date: invoice.due_date,
                balance_due: invoice.balance_due,
                overdue: InvoicePaymentStatus::from(invoice.payment_status)
                    == InvoicePaymentStatus::Overdue,
            })
            .collect();

        let unallocated = ledger::unallocated_amount(txn, &payment).await?;
        let plan = StrategyPlanner::plan(strategy, options, &open, unallocated, now.date_naive())?;

        let (entries, total) = if plan.is_empty() {
            (Vec::new(), Decimal::ZERO)
        } else {
            let source = EntrySource {
                method: AllocationMethod::Automatic,
                strategy: Some(strategy),
                note: options.note.clone(),
            };
            let applied =
                ledger::apply_allocations(txn, ctx, &payment, &plan, &source, now).await?;
            (applied.entries, applied.total)
        };

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::AutoAllocate,
                json!({
                    "payment_id": payment.id,
                    "strategy": strategy.as_str(),
                    "allocations_count": entries.len(),
                    "total_allocated": total,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            payment_id = %payment.id,
            strategy = %strategy,
            allocations = entries.len(),
            total = %total,
            "Payment auto-allocated"
        );

        Ok(entries)
    }

    /// Reverses one active entry and recalculates its invoice.
    ///
    /// Refund entries can be reversed too; they have no invoice to recalculate.
    ///
    /// # Errors
    ///
    /// - `AllocationNotFound` if the entry is not in the caller's company
    /// - `AllocationAlreadyReversed` if it is already inactive
    pub async fn reverse_allocation(
        &self,
        ctx: &dyn ExecutionContext,
        allocation_id: AllocationId,
        reason: Option<String>,
    ) -> Result<payment_allocations::Model, EngineError> {
        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::ReverseAllocation)
                .await?;
        let txn = scope.transaction();
        let now = Utc::now();
        let company_id = ctx.company_id();

        let payment_id = find_entry(txn, company_id, allocation_id).await?.payment_id;
        ledger::lock_payment(txn, company_id, PaymentId::from_uuid(payment_id)).await?;

        // Re-read under the payment lock; a concurrent reversal may have won.
        let entry = find_entry(txn, company_id, allocation_id).await?;
        if !entry.is_active() {
            return Err(EngineError::AllocationAlreadyReversed(allocation_id));
        }

        let invoice = match entry.invoice_id {
            Some(invoice_id) => Some(
                ledger::lock_invoice(txn, company_id, InvoiceId::from_uuid(invoice_id)).await?,
            ),
            None => None,
        };

        let amount = entry.allocated_amount;
        let reversed = ledger::reverse_entry(txn, entry, reason.clone(), now).await?;
        if let Some(invoice) = invoice {
            ledger::recalculate_locked(txn, invoice, now).await?;
        }

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::ReverseAllocation,
                json!({
                    "allocation_id": reversed.id,
                    "payment_id": reversed.payment_id,
                    "invoice_id": reversed.invoice_id,
                    "amount": amount,
                    "reason": reason,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            allocation_id = %reversed.id,
            payment_id = %reversed.payment_id,
            amount = %amount,
            "Allocation reversed"
        );

        Ok(reversed)
    }

    /// Reverses several entries in one transaction.
    ///
    /// Unknown and already reversed ids are reported per entry instead of
    /// failing the batch. Results come back in request order; an id listed
    /// twice is reversed once.
    ///
    /// # Errors
    ///
    /// - `EmptyRequest` if `allocation_ids` is empty
    /// - `LockTimeout` / `SerializationFailure` (retryable)
    pub async fn reverse_allocations(
        &self,
        ctx: &dyn ExecutionContext,
        allocation_ids: &[AllocationId],
        reason: Option<String>,
    ) -> Result<BatchReversal, EngineError> {
        if allocation_ids.is_empty() {
            return Err(EngineError::EmptyRequest);
        }

        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::ReverseAllocations)
                .await?;
        let txn = scope.transaction();
        let now = Utc::now();
        let company_id = ctx.company_id();

        let payment_ids: BTreeSet<Uuid> = find_entries(txn, company_id, allocation_ids)
            .await?
            .iter()
            .map(|entry| entry.payment_id)
            .collect();
        for payment_id in &payment_ids {
            ledger::lock_payment(txn, company_id, PaymentId::from_uuid(*payment_id)).await?;
        }

        let mut entries: HashMap<Uuid, payment_allocations::Model> =
            find_entries(txn, company_id, allocation_ids)
                .await?
                .into_iter()
                .map(|entry| (entry.id, entry))
                .collect();

        let invoice_ids: Vec<InvoiceId> = entries
            .values()
            .filter(|entry| entry.is_active())
            .filter_map(|entry| entry.invoice_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(InvoiceId::from_uuid)
            .collect();
        let locked = ledger::lock_invoices(txn, company_id, &invoice_ids).await?;

        let mut results = Vec::with_capacity(allocation_ids.len());
        for &allocation_id in allocation_ids {
            let key = allocation_id.into_inner();
            let outcome = match entries.remove(&key) {
                None => ReversalOutcome::NotFound,
                Some(entry) if !entry.is_active() => {
                    entries.insert(key, entry);
                    ReversalOutcome::AlreadyReversed
                }
                Some(entry) => {
                    let amount = entry.allocated_amount;
                    let reversed = ledger::reverse_entry(txn, entry, reason.clone(), now).await?;
                    entries.insert(key, reversed);
                    ReversalOutcome::Reversed { amount }
                }
            };
            results.push(ReversalResult {
                allocation_id,
                outcome,
            });
        }

        for invoice in locked {
            ledger::recalculate_locked(txn, invoice, now).await?;
        }

        let batch = BatchReversal { results };
        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::ReverseAllocations,
                json!({
                    "requested": allocation_ids.len(),
                    "reversed_count": batch.reversed_count(),
                    "skipped_count": batch.skipped_count(),
                    "total_reversed": batch.total_reversed(),
                    "reason": reason,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            reversed = batch.reversed_count(),
            skipped = batch.skipped_count(),
            total = %batch.total_reversed(),
            "Allocations reversed"
        );

        Ok(batch)
    }

    /// Reverses an invoice's active payment allocations, newest first.
    ///
    /// With `max_amount`, entries are taken while their running total stays
    /// within it, so an entry larger than what is left stops the walk. Refund
    /// entries carry no invoice and are never touched. Returns the reversed
    /// entries, newest first.
    ///
    /// # Errors
    ///
    /// - `NegativeAmount` if `max_amount` is not positive
    /// - `InvoiceNotFound` if the invoice is not in the caller's company
    /// - `LockTimeout` / `SerializationFailure` (retryable)
    pub async fn reverse_invoice_allocations(
        &self,
        ctx: &dyn ExecutionContext,
        invoice_id: InvoiceId,
        reason: Option<String>,
        max_amount: Option<Decimal>,
    ) -> Result<Vec<payment_allocations::Model>, EngineError> {
        if max_amount.is_some_and(|max| max <= Decimal::ZERO) {
            return Err(EngineError::NegativeAmount);
        }

        let scope = audit::begin_operation(
            &self.db,
            &self.config,
            ctx,
            AuditAction::ReverseInvoiceAllocations,
        )
        .await?;
        let txn = scope.transaction();
        let now = Utc::now();
        let company_id = ctx.company_id();

        let payment_ids: BTreeSet<Uuid> = invoice_entries(txn, company_id, invoice_id)
            .await?
            .iter()
            .map(|entry| entry.payment_id)
            .collect();
        for payment_id in &payment_ids {
            ledger::lock_payment(txn, company_id, PaymentId::from_uuid(*payment_id)).await?;
        }
        let invoice = ledger::lock_invoice(txn, company_id, invoice_id).await?;

        // An allocation committed between the two reads belongs to a payment
        // this transaction does not hold.
        let entries = invoice_entries(txn, company_id, invoice_id).await?;
        if entries.iter().any(|entry| !payment_ids.contains(&entry.payment_id)) {
            return Err(EngineError::SerializationFailure);
        }

        let amounts: Vec<Decimal> = entries.iter().map(|entry| entry.allocated_amount).collect();
        let count = AllocationService::reversal_count(&amounts, max_amount)?;

        let mut reversed = Vec::with_capacity(count);
        for entry in entries.into_iter().take(count) {
            reversed.push(ledger::reverse_entry(txn, entry, reason.clone(), now).await?);
        }
        let total: Decimal = reversed.iter().map(|entry| entry.allocated_amount).sum();
        let invoice = ledger::recalculate_locked(txn, invoice, now).await?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::ReverseInvoiceAllocations,
                json!({
                    "invoice_id": invoice.id,
                    "reversed_count": reversed.len(),
                    "total_reversed": total,
                    "max_amount": max_amount,
                    "reason": reason,
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            invoice_id = %invoice.id,
            reversed = reversed.len(),
            total = %total,
            balance_due = %invoice.balance_due,
            "Invoice allocations reversed"
        );

        Ok(reversed)
    }

    /// What a customer owes, per currency, and what they hold in unapplied
    /// payments.
    ///
    /// Only issued invoices with a positive balance are listed. Unapplied money
    /// comes from completed payments; pending ones are not yet confirmed. An
    /// unknown customer gets an empty summary.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn customer_balance_summary(
        &self,
        ctx: &dyn ExecutionContext,
        customer_id: CustomerId,
    ) -> Result<CustomerBalanceSummary, EngineError> {
        let company_id = ctx.company_id().into_inner();
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let txn = scope.transaction();
        let today = Utc::now().date_naive();

        let open = invoices::Entity::find()
            .filter(invoices::Column::CompanyId.eq(company_id))
            .filter(invoices::Column::CustomerId.eq(customer_id.into_inner()))
            .filter(
                invoices::Column::Status.is_not_in([InvoiceStatus::Draft, InvoiceStatus::Cancelled]),
            )
            .filter(invoices::Column::BalanceDue.gt(Decimal::ZERO))
            .all(txn)
            .await
            .map_err(map_db_err)?;

        let mut outstanding = Vec::with_capacity(open.len());
        for invoice in open {
            outstanding.push(OutstandingInvoice {
                id: invoice.id.into(),
                currency: parse_currency(&invoice.currency, invoice.id)?,
                days_overdue: (today - invoice.due_date).num_days().max(0),
                payment_status: invoice.payment_status.into(),
                invoice_number: invoice.invoice_number,
                issue_date: invoice.issue_date,
                due_date: invoice.due_date,
                total_amount: invoice.total_amount,
                paid_amount: invoice.paid_amount,
                balance_due: invoice.balance_due,
            });
        }

        let completed = payments::Entity::find()
            .filter(payments::Column::CompanyId.eq(company_id))
            .filter(payments::Column::CustomerId.eq(customer_id.into_inner()))
            .filter(payments::Column::Status.eq(PaymentStatus::Completed))
            .order_by_asc(payments::Column::Id)
            .all(txn)
            .await
            .map_err(map_db_err)?;

        let mut unallocated = Vec::with_capacity(completed.len());
        for payment in &completed {
            unallocated.push((
                parse_currency(&payment.currency, payment.id)?,
                ledger::unallocated_amount(txn, payment).await?,
            ));
        }

        scope.commit().await.map_err(map_db_err)?;

        Ok(CustomerBalanceSummary::build(
            customer_id,
            outstanding,
            &unallocated,
        ))
    }

    /// Lists a payment's entries, active and reversed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_payment(
        &self,
        ctx: &dyn ExecutionContext,
        payment_id: PaymentId,
    ) -> Result<Vec<payment_allocations::Model>, EngineError> {
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let entries = payment_allocations::Entity::find()
            .filter(payment_allocations::Column::CompanyId.eq(ctx.company_id().into_inner()))
            .filter(payment_allocations::Column::PaymentId.eq(payment_id.into_inner()))
            .order_by_asc(payment_allocations::Column::CreatedAt)
            .order_by_asc(payment_allocations::Column::Id)
            .all(scope.transaction())
            .await
            .map_err(map_db_err)?;
        scope.commit().await.map_err(map_db_err)?;
        Ok(entries)
    }
}

async fn find_entry<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    allocation_id: AllocationId,
) -> Result<payment_allocations::Model, EngineError> {
    payment_allocations::Entity::find_by_id(allocation_id.into_inner())
        .filter(payment_allocations::Column::CompanyId.eq(company_id.into_inner()))
        .one(conn)
        .await
        .map_err(map_db_err)?
        .ok_or(EngineError::AllocationNotFound(allocation_id))
}

async fn find_entries<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    allocation_ids: &[AllocationId],
) -> Result<Vec<payment_allocations::Model>, EngineError> {
    payment_allocations::Entity::find()
        .filter(payment_allocations::Column::CompanyId.eq(company_id.into_inner()))
        .filter(
            payment_allocations::Column::Id
                .is_in(allocation_ids.iter().map(|id| id.into_inner())),
        )
        .all(conn)
        .await
        .map_err(map_db_err)
}

/// Active payment allocations of an invoice, newest first.
async fn invoice_entries<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    invoice_id: InvoiceId,
) -> Result<Vec<payment_allocations::Model>, EngineError> {
    payment_allocations::Entity::find()
        .filter(payment_allocations::Column::CompanyId.eq(company_id.into_inner()))
        .filter(payment_allocations::Column::InvoiceId.eq(invoice_id.into_inner()))
        .filter(payment_allocations::Column::EntryKind.eq(AllocationEntryKind::Allocation))
        .filter(payment_allocations::Column::ReversedAt.is_null())
        .order_by_desc(payment_allocations::Column::CreatedAt)
        .order_by_desc(payment_allocations::Column::Id)
        .all(conn)
        .await
        .map_err(map_db_err)
}

fn parse_currency(code: &str, row: Uuid) -> Result<CurrencyCode, EngineError> {
    code.parse()
        .map_err(|e| EngineError::Internal(format!("row {row}: {e}")))
}
