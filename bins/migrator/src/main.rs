//! Database migration runner for Settle.
//!
//! Usage:
//!   migrator up       - Run all pending migrations
//!   migrator down     - Rollback last migration
//!   migrator status   - Show migration status
//!   migrator fresh    - Drop all tables and re-run migrations
//!   migrator refresh  - Rollback all migrations, then re-apply them
//!
//! The connection URL comes from `SETTLE__DATABASE__URL` (or `config/*.toml`),
//! the same source the engine uses.

use std::process::ExitCode;

use sea_orm_migration::MigratorTrait;
use settle_db::{connect_with, migration::Migrator};
use settle_shared::AppConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settle_db=info,sea_orm_migration=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let db = match connect_with(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return ExitCode::FAILURE;
        }
    };

    let result = match command.as_str() {
        "up" => Migrator::up(&db, None).await,
        "down" => Migrator::down(&db, Some(1)).await,
        "status" => Migrator::status(&db).await,
        "fresh" => Migrator::fresh(&db).await,
        "refresh" => Migrator::refresh(&db).await,
        other => {
            error!(command = other, "Unknown command (expected up, down, status, fresh or refresh)");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => {
            info!(command = %command, "Migration command finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(command = %command, error = %e, "Migration command failed");
            ExitCode::FAILURE
        }
    }
}
