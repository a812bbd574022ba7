//! Core business logic for Settle.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! All domain types, validation rules, and calculations live here.
//!
//! # Modules
//!
//! - `allocation` - Allocation validation and automatic allocation strategies
//! - `invoice` - Invoice balance and payment status calculation
//! - `payment` - Payment lifecycle rules
//! - `numbering` - Document number formatting
//! - `audit` - Audit trail entries
//! - `context` - Explicit per-call execution context
//! - `error` - Engine error taxonomy

pub mod allocation;
pub mod audit;
pub mod context;
pub mod error;
pub mod invoice;
pub mod numbering;
pub mod payment;

pub use context::{ExecutionContext, ServiceContext};
pub use error::{EngineError, ErrorKind};
