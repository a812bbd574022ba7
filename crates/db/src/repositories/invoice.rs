//! Invoice repository: issuing invoices and recalculating their balances.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::json;
use settle_core::ExecutionContext;
use settle_core::audit::{AuditAction, AuditEntry};
use settle_core::context::authorize;
use settle_core::error::EngineError;
use settle_core::invoice::InvoiceStatus;
use settle_core::numbering::{DocumentKind, normalize_prefix};
use settle_shared::EngineConfig;
use settle_shared::types::{CurrencyCode, CustomerId, InvoiceId, round_amount};
use uuid::Uuid;

use super::{audit, ledger, numbering};
use crate::entities::{invoice_line_items, invoices, sea_orm_active_enums::InvoicePaymentStatus};
use crate::error::map_db_err;
use crate::scope::CompanyScope;

/// Upper bound (exclusive) of a `NUMERIC(19,4)` amount column.
const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_320, 232_830, 0, false, 0);

/// Input for one invoice line.
#[derive(Debug, Clone)]
pub struct CreateLineItemInput {
    /// Line description.
    pub description: String,
    /// Quantity, positive.
    pub quantity: Decimal,
    /// Unit price.
    pub unit_price: Decimal,
    /// Discount on the line.
    pub discount_amount: Decimal,
    /// Tax on the line, computed upstream.
    pub tax_amount: Decimal,
}

/// Input for issuing an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoiceInput {
    /// Billed customer.
    pub customer_id: CustomerId,
    /// Invoice currency.
    pub currency: CurrencyCode,
    /// Initial document status.
    pub status: InvoiceStatus,
    /// Issue date; its year numbers the invoice.
    pub issue_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
    /// Explicit number; generated when absent.
    pub invoice_number: Option<String>,
    /// Prefix for a generated number; the configured prefix when absent.
    pub prefix: Option<String>,
    /// Lines. When empty, `subtotal` and `tax_amount` are stored as given.
    pub line_items: Vec<CreateLineItemInput>,
    /// Subtotal for invoices without lines.
    pub subtotal: Decimal,
    /// Tax for invoices without lines.
    pub tax_amount: Decimal,
}

/// Invoice with its line items.
#[derive(Debug, Clone)]
pub struct InvoiceWithLines {
    /// Invoice header.
    pub invoice: invoices::Model,
    /// Line items in line order.
    pub line_items: Vec<invoice_line_items::Model>,
}

/// Invoice repository.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    db: DatabaseConnection,
    config: EngineConfig,
}

impl InvoiceRepository {
    /// Creates a new invoice repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Issues an invoice, numbering it when no number is given and computing
    /// its balance.
    ///
    /// # Errors
    ///
    /// - `NegativeAmount` for negative line or header amounts
    /// - `InvalidInvoiceInput` for a due date before the issue date, a
    ///   discount above its line amount, or a line amount out of range
    /// - `InvalidPrefix` for an unusable prefix
    /// - `Forbidden`, `DuplicateRequest`
    pub async fn create_invoice(
        &self,
        ctx: &dyn ExecutionContext,
        input: CreateInvoiceInput,
    ) -> Result<InvoiceWithLines, EngineError> {
        validate_amounts(&input)?;
        let prefix = normalize_prefix(
            input
                .prefix
                .as_deref()
                .unwrap_or(&self.config.invoice_prefix),
        )?;

        let scope =
            audit::begin_operation(&self.db, &self.config, ctx, AuditAction::CreateInvoice).await?;
        let txn = scope.transaction();
        let company_id = ctx.company_id();
        let now = Utc::now();

        let invoice_number = match input.invoice_number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => number.to_string(),
            _ => {
                numbering::generate_in(
                    txn,
                    company_id,
                    DocumentKind::Invoice,
                    &prefix,
                    input.issue_date.year(),
                )
                .await?
            }
        };

        let invoice = invoices::ActiveModel {
            id: Set(Uuid::now_v7()),
            company_id: Set(company_id.into_inner()),
            customer_id: Set(input.customer_id.into_inner()),
            invoice_number: Set(invoice_number),
            currency: Set(input.currency.to_string()),
            subtotal: Set(round_amount(input.subtotal)),
            tax_amount: Set(round_amount(input.tax_amount)),
            total_amount: Set(round_amount(input.subtotal + input.tax_amount)),
            status: Set(input.status.into()),
            payment_status: Set(InvoicePaymentStatus::Unpaid),
            issue_date: Set(input.issue_date),
            due_date: Set(input.due_date),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(map_db_err)?;

        let mut line_items = Vec::with_capacity(input.line_items.len());
        for (line_number, line) in (1..).zip(&input.line_items) {
            let item = invoice_line_items::ActiveModel {
                id: Set(Uuid::now_v7()),
                invoice_id: Set(invoice.id),
                company_id: Set(invoice.company_id),
                line_number: Set(line_number),
                description: Set(line.description.clone()),
                quantity: Set(round_amount(line.quantity)),
                unit_price: Set(round_amount(line.unit_price)),
                discount_amount: Set(round_amount(line.discount_amount)),
                tax_amount: Set(round_amount(line.tax_amount)),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(map_db_err)?;
            line_items.push(item);
        }

        let invoice = ledger::recalculate_locked(txn, invoice, now).await?;

        audit::record(
            txn,
            AuditEntry::new(
                ctx,
                AuditAction::CreateInvoice,
                json!({
                    "invoice_id": invoice.id,
                    "invoice_number": invoice.invoice_number,
                    "total_amount": invoice.total_amount,
                    "line_items_count": line_items.len(),
                }),
            ),
        )
        .await?;

        scope.commit().await.map_err(map_db_err)?;

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total_amount = %invoice.total_amount,
            "Invoice created"
        );

        Ok(InvoiceWithLines {
            invoice,
            line_items,
        })
    }

    /// Recalculates an invoice's totals, balance and payment status from its
    /// current line items, allocations and credit applications.
    ///
    /// Changes no ledger fact, so no audit entry is written.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound` if the invoice is not in the caller's company.
    pub async fn recalculate_invoice(
        &self,
        ctx: &dyn ExecutionContext,
        invoice_id: InvoiceId,
    ) -> Result<invoices::Model, EngineError> {
        authorize(ctx)?;
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;

        let invoice = ledger::lock_invoice(scope.transaction(), ctx.company_id(), invoice_id).await?;
        let invoice = ledger::recalculate_locked(scope.transaction(), invoice, Utc::now()).await?;

        scope.commit().await.map_err(map_db_err)?;
        Ok(invoice)
    }

    /// Finds an invoice with its line items.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_invoice(
        &self,
        ctx: &dyn ExecutionContext,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceWithLines>, EngineError> {
        let scope = CompanyScope::begin(&self.db, ctx.company_id(), self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let txn = scope.transaction();

        let Some(invoice) = invoices::Entity::find_by_id(invoice_id.into_inner())
            .filter(invoices::Column::CompanyId.eq(ctx.company_id().into_inner()))
            .one(txn)
            .await
            .map_err(map_db_err)?
        else {
            return Ok(None);
        };

        let line_items = invoice_line_items::Entity::find()
            .filter(invoice_line_items::Column::InvoiceId.eq(invoice.id))
            .order_by_asc(invoice_line_items::Column::LineNumber)
            .all(txn)
            .await
            .map_err(map_db_err)?;

        scope.commit().await.map_err(map_db_err)?;
        Ok(Some(InvoiceWithLines {
            invoice,
            line_items,
        }))
    }
}

fn validate_amounts(input: &CreateInvoiceInput) -> Result<(), EngineError> {
    let negative_line = input.line_items.iter().any(|line| {
        line.quantity <= Decimal::ZERO
            || line.unit_price < Decimal::ZERO
            || line.discount_amount < Decimal::ZERO
            || line.tax_amount < Decimal::ZERO
    });
    if negative_line || input.subtotal < Decimal::ZERO || input.tax_amount < Decimal::ZERO {
        return Err(EngineError::NegativeAmount);
    }

    if input.due_date < input.issue_date {
        return Err(EngineError::InvalidInvoiceInput(format!(
            "due date {} is before issue date {}",
            input.due_date, input.issue_date
        )));
    }

    for (n, line) in input.line_items.iter().enumerate() {
        let gross = line
            .quantity
            .checked_mul(line.unit_price)
            .filter(|gross| *gross < MAX_AMOUNT)
            .ok_or_else(|| {
                EngineError::InvalidInvoiceInput(format!("line {} amount is out of range", n + 1))
            })?;
        if line.discount_amount > gross {
            return Err(EngineError::InvalidInvoiceInput(format!(
                "line {} discount {} exceeds its amount {gross}",
                n + 1,
                line.discount_amount
            )));
        }
    }
    Ok(())
}
