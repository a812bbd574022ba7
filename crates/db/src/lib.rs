//! Database layer with `SeaORM` entities and the allocation engine repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - Database migrations, including row-level security policies
//! - Company-scoped transactions
//! - Repositories implementing the payment, allocation, invoice and
//!   numbering operations

pub mod entities;
pub mod error;
pub mod migration;
pub mod repositories;
pub mod scope;

pub use error::map_db_err;
pub use repositories::{
    AllocationRepository, CreateInvoiceInput, CreateLineItemInput, InvoiceRepository,
    InvoiceWithLines, NumberingRepository, PaymentRepository, PaymentWithAllocations,
};
pub use scope::CompanyScope;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use settle_shared::DatabaseConfig;

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Establishes a pooled connection sized from configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_with(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .sqlx_logging(false);
    Database::connect(options).await
}
