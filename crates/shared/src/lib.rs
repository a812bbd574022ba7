//! Shared types and configuration for Settle.
//!
//! This crate provides common types used across all other crates:
//! - Money helpers with fixed-point decimal precision
//! - Typed IDs for type-safe entity references
//! - Configuration management

pub mod config;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, EngineConfig};
