//! Company-scoped transactions.
//!
//! Every engine operation runs inside one transaction that first sets the
//! row-level security scope and the lock timeout with `SET LOCAL`, so both
//! settings vanish at commit or rollback.
//!
//! ```ignore
//! let scope = CompanyScope::begin(&db, company_id, 5_000).await?;
//! let payment = Payments::find_by_id(id).one(scope.transaction()).await?;
//! scope.commit().await?;
//! ```

use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use settle_shared::types::CompanyId;

/// A transaction bound to one company.
///
/// Dropping it without [`commit`](Self::commit) rolls back.
pub struct CompanyScope {
    txn: DatabaseTransaction,
    company_id: CompanyId,
}

impl CompanyScope {
    /// Begins a transaction scoped to `company_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or the scope
    /// cannot be set.
    pub async fn begin(
        db: &DatabaseConnection,
        company_id: CompanyId,
        lock_timeout_ms: u64,
    ) -> Result<Self, DbErr> {
        let txn = db.begin().await?;
        set_company_scope(&txn, company_id, lock_timeout_ms).await?;
        Ok(Self { txn, company_id })
    }

    /// The underlying transaction. All queries must go through it.
    #[must_use]
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// The company this scope is bound to.
    #[must_use]
    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<(), DbErr> {
        self.txn.commit().await
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

/// Sets the company scope and lock timeout on a caller-owned transaction.
///
/// # Errors
///
/// Returns an error if the settings cannot be applied.
pub async fn set_company_scope<C>(
    conn: &C,
    company_id: CompanyId,
    lock_timeout_ms: u64,
) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    conn.execute_unprepared(&scope_sql(company_id, lock_timeout_ms))
        .await?;
    Ok(())
}

fn scope_sql(company_id: CompanyId, lock_timeout_ms: u64) -> String {
    // Both values are rendered from typed input, never from caller strings.
    format!(
        "SET LOCAL app.current_company_id = '{company_id}'; SET LOCAL lock_timeout = '{lock_timeout_ms}ms'"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_scope_sql_format() {
        let company_id = CompanyId::from_uuid(
            Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
        );
        assert_eq!(
            scope_sql(company_id, 2500),
            "SET LOCAL app.current_company_id = '550e8400-e29b-41d4-a716-446655440000'; SET LOCAL lock_timeout = '2500ms'"
        );
    }
}
