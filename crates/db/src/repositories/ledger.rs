//! Locked reads and writes shared by the payment, allocation and invoice
//! repositories.
//!
//! Lock order everywhere: the payment row first, then invoice rows ascending
//! by id. Callers must hold the payment lock before touching its entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, sea_query::Expr,
};
use settle_core::ExecutionContext;
use settle_core::allocation::{
    AllocationMethod, AllocationRequest, AllocationService, AllocationStrategy, EntryKind,
};
use settle_core::error::EngineError;
use settle_core::invoice::{
    BalanceInputs, InvoiceBalanceCalculator, InvoiceState, InvoiceView, LineItem,
};
use settle_core::payment::PaymentView;
use settle_shared::types::{CompanyId, InvoiceId, PaymentId};
use uuid::Uuid;

use crate::entities::{
    credit_note_applications, invoice_line_items, invoices, payment_allocations, payments,
    sea_orm_active_enums::AllocationEntryKind,
};
use crate::error::map_db_err;

/// How a batch of allocation entries came about.
#[derive(Debug, Clone)]
pub(crate) struct EntrySource {
    pub method: AllocationMethod,
    pub strategy: Option<AllocationStrategy>,
    pub note: Option<String>,
}

impl EntrySource {
    pub(crate) fn manual(note: Option<String>) -> Self {
        Self {
            method: AllocationMethod::Manual,
            strategy: None,
            note,
        }
    }
}

/// Result of applying a batch of allocations.
#[derive(Debug, Clone)]
pub(crate) struct AppliedAllocations {
    pub entries: Vec<payment_allocations::Model>,
    pub total: Decimal,
}

// ========== Locking ==========

/// Locks the payment row `FOR UPDATE`. Payments of other companies are not found.
pub(crate) async fn lock_payment<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    payment_id: PaymentId,
) -> Result<payments::Model, EngineError> {
    payments::Entity::find_by_id(payment_id.into_inner())
        .filter(payments::Column::CompanyId.eq(company_id.into_inner()))
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(map_db_err)?
        .ok_or(EngineError::PaymentNotFound(payment_id))
}

/// Locks invoice rows one at a time in ascending id order.
///
/// `ids` must already be sorted. Missing or foreign invoices are skipped;
/// validation reports them.
pub(crate) async fn lock_invoices<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    ids: &[InvoiceId],
) -> Result<Vec<invoices::Model>, EngineError> {
    debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "lock order");

    let mut locked = Vec::with_capacity(ids.len());
    for id in ids {
        let invoice = invoices::Entity::find_by_id(id.into_inner())
            .filter(invoices::Column::CompanyId.eq(company_id.into_inner()))
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(map_db_err)?;
        if let Some(invoice) = invoice {
            locked.push(invoice);
        }
    }
    Ok(locked)
}

/// Locks a single invoice.
pub(crate) async fn lock_invoice<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    invoice_id: InvoiceId,
) -> Result<invoices::Model, EngineError> {
    lock_invoices(conn, company_id, &[invoice_id])
        .await?
        .pop()
        .ok_or(EngineError::InvoiceNotFound(invoice_id))
}

// ========== Sums ==========

/// Sum of active entries (allocations and refunds) against a payment.
pub(crate) async fn active_payment_total<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
) -> Result<Decimal, EngineError> {
    let total: Option<Option<Decimal>> = payment_allocations::Entity::find()
        .filter(payment_allocations::Column::PaymentId.eq(payment_id))
        .filter(payment_allocations::Column::ReversedAt.is_null())
        .select_only()
        .column_as(Expr::col(payment_allocations::Column::AllocatedAmount).sum(), "total")
        .into_tuple()
        .one(conn)
        .await
        .map_err(map_db_err)?;
    Ok(total.flatten().unwrap_or_default())
}

/// Number of active entries against a payment.
pub(crate) async fn active_payment_entries<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
) -> Result<u64, EngineError> {
    payment_allocations::Entity::find()
        .filter(payment_allocations::Column::PaymentId.eq(payment_id))
        .filter(payment_allocations::Column::ReversedAt.is_null())
        .count(conn)
        .await
        .map_err(map_db_err)
}

/// Unallocated amount of a locked payment.
pub(crate) async fn unallocated_amount<C: ConnectionTrait>(
    conn: &C,
    payment: &payments::Model,
) -> Result<Decimal, EngineError> {
    let active = active_payment_total(conn, payment.id).await?;
    AllocationService::unallocated_amount(payment.amount, active)
}

// ========== Views ==========

pub(crate) fn payment_view(model: &payments::Model) -> Result<PaymentView, EngineError> {
    Ok(PaymentView {
        id: model.id.into(),
        company_id: model.company_id.into(),
        customer_id: model.customer_id.into(),
        currency: model
            .currency
            .parse()
            .map_err(|e| EngineError::Internal(format!("payment {}: {e}", model.id)))?,
        amount: model.amount,
        status: model.status.into(),
    })
}

pub(crate) fn invoice_view(model: &invoices::Model) -> Result<InvoiceView, EngineError> {
    Ok(InvoiceView {
        id: model.id.into(),
        company_id: model.company_id.into(),
        currency: model
            .currency
            .parse()
            .map_err(|e| EngineError::Internal(format!("invoice {}: {e}", model.id)))?,
        status: model.status.into(),
        balance_due: model.balance_due,
    })
}

// ========== Writes ==========

/// Validates and applies allocations against a locked payment.
///
/// Locks the target invoices, inserts one entry per request, recalculates every
/// touched invoice and re-checks that the payment is not over-allocated.
/// Entries are returned in request order.
pub(crate) async fn apply_allocations<C: ConnectionTrait>(
    conn: &C,
    ctx: &dyn ExecutionContext,
    payment: &payments::Model,
    requests: &[AllocationRequest],
    source: &EntrySource,
    now: DateTime<Utc>,
) -> Result<AppliedAllocations, EngineError> {
    let company_id = CompanyId::from_uuid(payment.company_id);
    let view = payment_view(payment)?;
    let unallocated = unallocated_amount(conn, payment).await?;

    let lock_order = AllocationService::invoice_lock_order(requests);
    let locked = lock_invoices(conn, company_id, &lock_order).await?;
    let views = locked
        .iter()
        .map(invoice_view)
        .collect::<Result<Vec<_>, _>>()?;

    let validated = AllocationService::validate(&view, unallocated, requests, &views)?;

    let mut entries = Vec::with_capacity(validated.requests.len());
    for request in &validated.requests {
        let entry = payment_allocations::ActiveModel {
            id: Set(Uuid::now_v7()),
            company_id: Set(payment.company_id),
            payment_id: Set(payment.id),
            invoice_id: Set(Some(request.invoice_id.into_inner())),
            entry_kind: Set(EntryKind::Allocation.into()),
            allocated_amount: Set(request.amount),
            allocation_date: Set(now.date_naive()),
            allocation_method: Set(source.method.into()),
            allocation_strategy: Set(source.strategy.map(|s| s.as_str().to_string())),
            notes: Set(source.note.clone()),
            created_by_user_id: Set(ctx.acting_user_id().map(Into::into)),
            ..Default::default()
        }
        .insert(conn)
        .await
        .map_err(map_db_err)?;
        entries.push(entry);
    }

    for invoice in locked {
        recalculate_locked(conn, invoice, now).await?;
    }

    ensure_not_over_allocated(conn, payment).await?;

    Ok(AppliedAllocations {
        entries,
        total: validated.total,
    })
}

/// Marks an active entry reversed. The payment (and the invoice, if any) must
/// already be locked.
pub(crate) async fn reverse_entry<C: ConnectionTrait>(
    conn: &C,
    entry: payment_allocations::Model,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<payment_allocations::Model, EngineError> {
    let mut active: payment_allocations::ActiveModel = entry.into();
    active.reversed_at = Set(Some(now.fixed_offset()));
    active.reversal_reason = Set(reason);
    active.update(conn).await.map_err(map_db_err)
}

/// Active allocation entries (not refunds) of a payment, oldest first.
pub(crate) async fn active_allocations<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
) -> Result<Vec<payment_allocations::Model>, EngineError> {
    payment_allocations::Entity::find()
        .filter(payment_allocations::Column::PaymentId.eq(payment_id))
        .filter(payment_allocations::Column::EntryKind.eq(AllocationEntryKind::Allocation))
        .filter(payment_allocations::Column::ReversedAt.is_null())
        .order_by_asc(payment_allocations::Column::CreatedAt)
        .order_by_asc(payment_allocations::Column::Id)
        .all(conn)
        .await
        .map_err(map_db_err)
}

/// Re-checks that active entries do not exceed the payment amount.
pub(crate) async fn ensure_not_over_allocated<C: ConnectionTrait>(
    conn: &C,
    payment: &payments::Model,
) -> Result<(), EngineError> {
    let active = active_payment_total(conn, payment.id).await?;
    EngineError::ensure_integrity(active <= payment.amount, || {
        format!(
            "payment {} has {active} active against amount {}",
            payment.id, payment.amount
        )
    })
}

// ========== Invoice balance ==========

/// Recalculates a locked invoice from its line items, active allocations and
/// active credit applications, and stores the result.
pub(crate) async fn recalculate_locked<C: ConnectionTrait>(
    conn: &C,
    invoice: invoices::Model,
    now: DateTime<Utc>,
) -> Result<invoices::Model, EngineError> {
    let line_items = invoice_line_items::Entity::find()
        .filter(invoice_line_items::Column::InvoiceId.eq(invoice.id))
        .order_by_asc(invoice_line_items::Column::LineNumber)
        .all(conn)
        .await
        .map_err(map_db_err)?
        .into_iter()
        .map(|item| LineItem {
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_amount: item.discount_amount,
            tax_amount: item.tax_amount,
        })
        .collect();

    let payments_applied: Option<Option<Decimal>> = payment_allocations::Entity::find()
        .filter(payment_allocations::Column::InvoiceId.eq(invoice.id))
        .filter(payment_allocations::Column::EntryKind.eq(AllocationEntryKind::Allocation))
        .filter(payment_allocations::Column::ReversedAt.is_null())
        .select_only()
        .column_as(Expr::col(payment_allocations::Column::AllocatedAmount).sum(), "total")
        .into_tuple()
        .one(conn)
        .await
        .map_err(map_db_err)?;

    let credits_applied: Option<Option<Decimal>> = credit_note_applications::Entity::find()
        .filter(credit_note_applications::Column::InvoiceId.eq(invoice.id))
        .filter(credit_note_applications::Column::ReversedAt.is_null())
        .select_only()
        .column_as(Expr::col(credit_note_applications::Column::AppliedAmount).sum(), "total")
        .into_tuple()
        .one(conn)
        .await
        .map_err(map_db_err)?;

    let state = InvoiceState {
        status: invoice.status.into(),
        subtotal: invoice.subtotal,
        tax_amount: invoice.tax_amount,
        total_amount: invoice.total_amount,
        due_date: invoice.due_date,
        payment_status: invoice.payment_status.into(),
        paid_at: invoice.paid_at.map(|t| t.with_timezone(&Utc)),
        overdue_at: invoice.overdue_at.map(|t| t.with_timezone(&Utc)),
    };
    let inputs = BalanceInputs {
        line_items,
        payments_applied: payments_applied.flatten().unwrap_or_default(),
        credits_applied: credits_applied.flatten().unwrap_or_default(),
    };

    let balance = InvoiceBalanceCalculator::recalculate(&state, &inputs, now);

    let mut active: invoices::ActiveModel = invoice.into();
    active.subtotal = Set(balance.subtotal);
    active.tax_amount = Set(balance.tax_amount);
    active.total_amount = Set(balance.total_amount);
    active.paid_amount = Set(balance.paid_amount);
    active.credited_amount = Set(balance.credited_amount);
    active.balance_due = Set(balance.balance_due);
    active.payment_status = Set(balance.payment_status.into());
    active.paid_at = Set(balance.paid_at.map(|t| t.fixed_offset()));
    active.overdue_at = Set(balance.overdue_at.map(|t| t.fixed_offset()));
    active.updated_at = Set(now.fixed_offset());
    active.update(conn).await.map_err(map_db_err)
}
