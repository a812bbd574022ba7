//! Audit trail writes and request deduplication.

use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use settle_core::ExecutionContext;
use settle_core::audit::{AuditAction, AuditEntry};
use settle_core::context::authorize;
use settle_core::error::EngineError;
use settle_shared::EngineConfig;
use uuid::Uuid;

use crate::entities::{audit_log_entries, idempotency_keys};
use crate::error::{UNIQUE_VIOLATION, map_db_err, sqlstate};
use crate::scope::CompanyScope;

/// Opens the transaction for one mutating operation.
///
/// Checks the caller's permission, scopes the transaction to the caller's
/// company and, when deduplication is enabled, claims the
/// (idempotency key, action) pair.
pub(crate) async fn begin_operation(
    db: &DatabaseConnection,
    config: &EngineConfig,
    ctx: &dyn ExecutionContext,
    action: AuditAction,
) -> Result<CompanyScope, EngineError> {
    authorize(ctx)?;
    let scope = CompanyScope::begin(db, ctx.company_id(), config.lock_timeout_ms)
        .await
        .map_err(map_db_err)?;

    if config.deduplicate_requests {
        claim_request(scope.transaction(), ctx, action).await?;
    }

    Ok(scope)
}

/// Records the pair; a repeat blocks until the first commits, then fails.
async fn claim_request<C: ConnectionTrait>(
    conn: &C,
    ctx: &dyn ExecutionContext,
    action: AuditAction,
) -> Result<(), EngineError> {
    let claim = idempotency_keys::ActiveModel {
        company_id: Set(ctx.company_id().into_inner()),
        idempotency_key: Set(ctx.idempotency_key().to_string()),
        action: Set(action.as_str().to_string()),
        ..Default::default()
    };

    match idempotency_keys::Entity::insert(claim)
        .exec_without_returning(conn)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if sqlstate(&err).as_deref() == Some(UNIQUE_VIOLATION) => {
            Err(EngineError::DuplicateRequest {
                action: action.as_str().to_string(),
                idempotency_key: ctx.idempotency_key().to_string(),
            })
        }
        Err(err) => Err(map_db_err(err)),
    }
}

/// Writes one audit entry inside the caller's transaction.
pub(crate) async fn record<C: ConnectionTrait>(
    conn: &C,
    entry: AuditEntry,
) -> Result<audit_log_entries::Model, EngineError> {
    audit_log_entries::ActiveModel {
        id: Set(Uuid::now_v7()),
        action: Set(entry.action.as_str().to_string()),
        company_id: Set(entry.company_id.into_inner()),
        user_id: Set(entry.user_id.map(Into::into)),
        idempotency_key: Set(entry.idempotency_key),
        params: Set(entry.params),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(map_db_err)
}
