//! Payment allocation rules.
//!
//! - `types` - Requests, methods, entry kinds and strategies
//! - `service` - Validation of requests against locked rows
//! - `strategy` - Automatic allocation planners

pub mod service;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod service_props;

pub use service::AllocationService;
pub use strategy::{StrategyPlanner, split_by_weights};
pub use types::{
    AllocationMethod, AllocationRequest, AllocationStrategy, BatchReversal, EntryKind,
    ReversalOutcome, ReversalResult, StrategyOptions, ValidatedAllocation,
};
