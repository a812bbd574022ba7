//! Allocation domain types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_shared::types::{AllocationId, InvoiceId};

/// One (invoice, amount) pair of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Target invoice.
    pub invoice_id: InvoiceId,
    /// Amount to apply, must be positive.
    pub amount: Decimal,
}

impl AllocationRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(invoice_id: InvoiceId, amount: Decimal) -> Self {
        Self { invoice_id, amount }
    }
}

/// Whether the caller chose the invoices or a strategy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMethod {
    /// Caller-supplied invoice list.
    Manual,
    /// Planned by an [`AllocationStrategy`].
    Automatic,
}

/// What an allocation entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Money applied to an invoice.
    Allocation,
    /// Money returned to the customer; has no invoice.
    Refund,
}

/// Planner used by automatic allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Oldest due date first.
    Fifo,
    /// Split in proportion to balances due.
    Proportional,
    /// Overdue invoices first (most days overdue first), then the rest by due date.
    OverdueFirst,
    /// Largest balance first.
    LargestFirst,
    /// Caller-supplied percentage of the available amount per invoice.
    PercentageBased,
    /// Equal share per invoice, capped at each balance.
    EqualDistribution,
    /// Caller-supplied invoice order; unlisted invoices follow by due date.
    CustomPriority,
}

impl AllocationStrategy {
    /// Returns the snake_case strategy name stored on allocation rows.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Proportional => "proportional",
            Self::OverdueFirst => "overdue_first",
            Self::LargestFirst => "largest_first",
            Self::PercentageBased => "percentage_based",
            Self::EqualDistribution => "equal_distribution",
            Self::CustomPriority => "custom_priority",
        }
    }
}

impl std::fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra inputs for the strategies that need them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Upper bound on the total planned, below the unallocated amount.
    pub max_amount: Option<Decimal>,
    /// Per-invoice percentages for [`AllocationStrategy::PercentageBased`].
    pub percentages: Vec<(InvoiceId, Decimal)>,
    /// Invoice order for [`AllocationStrategy::CustomPriority`].
    pub priority: Vec<InvoiceId>,
    /// Note stored on every planned allocation.
    pub note: Option<String>,
}

/// Requests that passed validation, rounded to storage precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAllocation {
    /// Requests in caller order.
    pub requests: Vec<AllocationRequest>,
    /// Sum of all requests.
    pub total: Decimal,
    /// Distinct touched invoices, ascending (lock and recalculation order).
    pub invoice_ids: Vec<InvoiceId>,
}

/// What happened to one entry of a batch reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReversalOutcome {
    /// The entry was active and is now reversed.
    Reversed {
        /// Amount returned to the payment.
        amount: Decimal,
    },
    /// The entry had been reversed before.
    AlreadyReversed,
    /// No entry with this id in the caller's company.
    NotFound,
}

/// Per-entry result of a batch reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReversalResult {
    /// Requested entry.
    pub allocation_id: AllocationId,
    /// Outcome.
    pub outcome: ReversalOutcome,
}

/// Result of reversing several entries in one transaction, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReversal {
    /// One result per requested id.
    pub results: Vec<ReversalResult>,
}

impl BatchReversal {
    /// Number of entries reversed by this call.
    #[must_use]
    pub fn reversed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ReversalOutcome::Reversed { .. }))
            .count()
    }

    /// Number of ids that were skipped.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.results.len() - self.reversed_count()
    }

    /// Total amount reversed by this call.
    #[must_use]
    pub fn total_reversed(&self) -> Decimal {
        self.results
            .iter()
            .filter_map(|r| match r.outcome {
                ReversalOutcome::Reversed { amount } => Some(amount),
                _ => None,
            })
            .sum()
    }
}
