//! Mapping from database errors to engine errors.

use sea_orm::{DbErr, RuntimeErr};
use settle_core::EngineError;

/// `lock_not_available`, raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `serialization_failure`.
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`.
const DEADLOCK_DETECTED: &str = "40P01";
/// `unique_violation`.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// Returns the SQLSTATE of the Postgres error behind `err`, if any.
pub(crate) fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(e) => postgres_code(e),
        RuntimeErr::Internal(_) => None,
    }
}

fn postgres_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(std::borrow::Cow::into_owned)
}

/// Converts a database error into the engine's taxonomy.
///
/// Lock timeouts, serialization failures and deadlocks become retryable
/// concurrency errors; everything else is an infrastructure error.
pub fn map_db_err(err: DbErr) -> EngineError {
    match sqlstate(&err).as_deref() {
        Some(LOCK_NOT_AVAILABLE) => EngineError::LockTimeout,
        Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => EngineError::SerializationFailure,
        _ => EngineError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_sql_errors_map_to_database() {
        let err = map_db_err(DbErr::RecordNotFound("payments".to_string()));
        assert!(matches!(err, EngineError::Database(msg) if msg.contains("payments")));

        let err = map_db_err(DbErr::Custom("boom".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_runtime_error_has_no_sqlstate() {
        let err = DbErr::Exec(RuntimeErr::Internal("closed".to_string()));
        assert_eq!(sqlstate(&err), None);
    }
}
