//! Audit trail entries.
//!
//! Every mutating engine operation writes exactly one entry, inside the same
//! transaction as the change it records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use settle_shared::types::{CompanyId, UserId};

use crate::context::ExecutionContext;

/// Audited engine actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    /// Manual allocation.
    #[serde(rename = "payment.allocate")]
    Allocate,
    /// Strategy-planned allocation.
    #[serde(rename = "payment.auto_allocate")]
    AutoAllocate,
    /// Single allocation reversed.
    #[serde(rename = "payment.allocation.reverse")]
    ReverseAllocation,
    /// Several allocations reversed together.
    #[serde(rename = "payment.allocation.reverse_batch")]
    ReverseAllocations,
    /// Allocations of one invoice reversed.
    #[serde(rename = "invoice.allocations.reverse")]
    ReverseInvoiceAllocations,
    /// Payment created.
    #[serde(rename = "payment.create")]
    CreatePayment,
    /// Pending payment completed.
    #[serde(rename = "payment.process")]
    CompletePayment,
    /// Payment fields changed.
    #[serde(rename = "payment.update")]
    UpdatePayment,
    /// Payment deleted.
    #[serde(rename = "payment.delete")]
    DeletePayment,
    /// Payment voided, allocations kept.
    #[serde(rename = "payment.void")]
    VoidPayment,
    /// Payment voided and its allocations reversed.
    #[serde(rename = "payment.void_and_reverse")]
    VoidAndReverse,
    /// Part of a payment refunded.
    #[serde(rename = "payment.refund")]
    RefundPayment,
    /// Invoice issued.
    #[serde(rename = "invoice.create")]
    CreateInvoice,
}

impl AuditAction {
    /// Returns the dotted action name stored on the entry.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocate => "payment.allocate",
            Self::AutoAllocate => "payment.auto_allocate",
            Self::ReverseAllocation => "payment.allocation.reverse",
            Self::ReverseAllocations => "payment.allocation.reverse_batch",
            Self::ReverseInvoiceAllocations => "invoice.allocations.reverse",
            Self::CreatePayment => "payment.create",
            Self::CompletePayment => "payment.process",
            Self::UpdatePayment => "payment.update",
            Self::DeletePayment => "payment.delete",
            Self::VoidPayment => "payment.void",
            Self::VoidAndReverse => "payment.void_and_reverse",
            Self::RefundPayment => "payment.refund",
            Self::CreateInvoice => "invoice.create",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// What happened.
    pub action: AuditAction,
    /// Tenant.
    pub company_id: CompanyId,
    /// Acting user, if any.
    pub user_id: Option<UserId>,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
    /// Action parameters.
    pub params: Value,
}

impl AuditEntry {
    /// Builds an entry for `action` stamped with the caller's identity.
    #[must_use]
    pub fn new(ctx: &dyn ExecutionContext, action: AuditAction, params: Value) -> Self {
        Self {
            action,
            company_id: ctx.company_id(),
            user_id: ctx.acting_user_id(),
            idempotency_key: ctx.idempotency_key().to_string(),
            params,
        }
    }
}
