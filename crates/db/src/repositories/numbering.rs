//! Document number generation.
//!
//! Each (company, kind, prefix, year) has a counter row in
//! `document_sequences`. Generating a number locks that row, so concurrent
//! callers queue behind each other and never see the same value. The counter is
//! also moved past the newest existing document number, which covers numbers
//! inserted by hand or imported.

use chrono::{Datelike, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, sea_query::Expr, sea_query::OnConflict,
};
use settle_core::error::EngineError;
use settle_core::numbering::{
    DocumentKind, format_number, next_sequence, normalize_prefix, parse_sequence,
    sequence_pattern,
};
use settle_shared::EngineConfig;
use settle_shared::types::CompanyId;

use crate::entities::{document_sequences, invoices, payments};
use crate::error::map_db_err;
use crate::scope::CompanyScope;

/// Generates the next document number inside the caller's transaction.
///
/// `prefix` must already be normalized. The sequence row stays locked until
/// the caller's transaction ends.
pub async fn generate_in<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    kind: DocumentKind,
    prefix: &str,
    year: i32,
) -> Result<String, EngineError> {
    let seed = document_sequences::ActiveModel {
        company_id: Set(company_id.into_inner()),
        document_kind: Set(kind.as_str().to_string()),
        prefix: Set(prefix.to_string()),
        year: Set(year),
        last_value: Set(0),
        ..Default::default()
    };
    document_sequences::Entity::insert(seed)
        .on_conflict(
            OnConflict::columns([
                document_sequences::Column::CompanyId,
                document_sequences::Column::DocumentKind,
                document_sequences::Column::Prefix,
                document_sequences::Column::Year,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(map_db_err)?;

    let sequence = document_sequences::Entity::find_by_id((
        company_id.into_inner(),
        kind.as_str().to_string(),
        prefix.to_string(),
        year,
    ))
    .lock_exclusive()
    .one(conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| {
        EngineError::Internal(format!("{kind:?} sequence {prefix}-{year} vanished"))
    })?;

    let latest = latest_existing(conn, company_id, kind, prefix, year).await?;
    let next = next_sequence(sequence.last_value, latest);

    let mut active: document_sequences::ActiveModel = sequence.into();
    active.last_value = Set(next);
    active.updated_at = Set(Utc::now().fixed_offset());
    active.update(conn).await.map_err(map_db_err)?;

    Ok(format_number(prefix, year, next))
}

/// Highest sequence among existing documents with this prefix and year.
async fn latest_existing<C: ConnectionTrait>(
    conn: &C,
    company_id: CompanyId,
    kind: DocumentKind,
    prefix: &str,
    year: i32,
) -> Result<Option<i64>, EngineError> {
    let pattern = format!("{prefix}-{year}-%");
    let numeric = sequence_pattern(prefix, year);

    // Hand-entered numbers with a non-numeric suffix are skipped. Longer
    // numbers sort first so that 10000 beats 9999.
    let latest: Option<String> = match kind {
        DocumentKind::Invoice => {
            invoices::Entity::find()
                .filter(invoices::Column::CompanyId.eq(company_id.into_inner()))
                .filter(invoices::Column::InvoiceNumber.like(&pattern))
                .filter(Expr::cust_with_values("invoice_number ~ ?", [numeric]))
                .order_by_desc(Expr::cust("char_length(invoice_number)"))
                .order_by_desc(invoices::Column::InvoiceNumber)
                .select_only()
                .column(invoices::Column::InvoiceNumber)
                .into_tuple::<String>()
                .one(conn)
                .await
        }
        DocumentKind::Payment => {
            payments::Entity::find()
                .filter(payments::Column::CompanyId.eq(company_id.into_inner()))
                .filter(payments::Column::PaymentNumber.like(&pattern))
                .filter(Expr::cust_with_values("payment_number ~ ?", [numeric]))
                .order_by_desc(Expr::cust("char_length(payment_number)"))
                .order_by_desc(payments::Column::PaymentNumber)
                .select_only()
                .column(payments::Column::PaymentNumber)
                .into_tuple::<String>()
                .one(conn)
                .await
        }
    }
    .map_err(map_db_err)?;

    Ok(latest.and_then(|number| parse_sequence(&number, prefix, year)))
}

/// Repository for standalone number generation.
#[derive(Debug, Clone)]
pub struct NumberingRepository {
    db: DatabaseConnection,
    config: EngineConfig,
}

impl NumberingRepository {
    /// Creates a new numbering repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Generates the next invoice number for the current year in its own
    /// short transaction.
    ///
    /// Lock timeouts, serialization failures and deadlocks are retried up to
    /// `engine.numbering_max_attempts` times.
    ///
    /// # Errors
    ///
    /// - `InvalidPrefix` if the prefix is empty or not alphanumeric
    /// - `LockTimeout` / `SerializationFailure` once attempts run out
    pub async fn generate_invoice_number(
        &self,
        company_id: CompanyId,
        prefix: Option<&str>,
    ) -> Result<String, EngineError> {
        let prefix = normalize_prefix(prefix.unwrap_or(&self.config.invoice_prefix))?;
        let year = Utc::now().year();
        let max_attempts = self.config.numbering_max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.try_generate(company_id, &prefix, year).await {
                Ok(number) => return Ok(number),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        company_id = %company_id,
                        attempt,
                        error = %e,
                        "Invoice number generation conflicted, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_generate(
        &self,
        company_id: CompanyId,
        prefix: &str,
        year: i32,
    ) -> Result<String, EngineError> {
        let scope = CompanyScope::begin(&self.db, company_id, self.config.lock_timeout_ms)
            .await
            .map_err(map_db_err)?;
        let number =
            generate_in(scope.transaction(), company_id, DocumentKind::Invoice, prefix, year)
                .await?;
        scope.commit().await.map_err(map_db_err)?;
        Ok(number)
    }
}
