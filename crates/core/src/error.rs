//! Engine error types for allocation, balance and payment lifecycle operations.
//!
//! Every fallible engine operation returns [`EngineError`]. Variants are grouped
//! by [`ErrorKind`] so callers can decide between reporting, retrying and
//! escalating without matching on individual variants.

use rust_decimal::Decimal;
use settle_shared::types::{AllocationId, InvoiceId, PaymentId};
use thiserror::Error;

use crate::payment::PaymentStatus;

/// Broad classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected; retrying it unchanged fails again.
    Validation,
    /// A lock or serialization conflict; the operation may be retried.
    Concurrency,
    /// A ledger invariant was found broken. Never retried.
    Integrity,
    /// Database or internal failure.
    Infrastructure,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    // ========== Allocation Validation Errors ==========
    /// The allocation request list is empty or contains a zero amount.
    #[error("Allocation request must contain at least one positive amount")]
    EmptyRequest,

    /// An amount was negative (or not positive where a positive amount is required).
    #[error("Amount must be positive")]
    NegativeAmount,

    /// Sum of requested amounts exceeds what is left on the payment.
    #[error(
        "Total allocation amount exceeds unallocated payment amount. Requested: {requested}, available: {available}"
    )]
    OverAllocation {
        /// Sum of requested amounts.
        requested: Decimal,
        /// Unallocated amount on the payment.
        available: Decimal,
    },

    /// Invoice does not exist or belongs to another company.
    #[error("Invalid invoice ID: {0}")]
    InvalidInvoice(InvoiceId),

    /// Amount requested for an invoice exceeds its balance due.
    #[error("Allocation of {requested} exceeds balance due {balance_due} on invoice {invoice_id}")]
    ExceedsInvoiceBalance {
        /// The invoice.
        invoice_id: InvoiceId,
        /// Total requested for this invoice.
        requested: Decimal,
        /// Current balance due.
        balance_due: Decimal,
    },

    /// Payment and invoice currencies differ.
    #[error("Currency mismatch: payment is {payment}, invoice is {invoice}")]
    CurrencyMismatch {
        /// Payment currency code.
        payment: String,
        /// Invoice currency code.
        invoice: String,
    },

    /// Invoice is cancelled (or draft, for automatic allocation).
    #[error("Invoice {0} is not open for allocation")]
    InvoiceNotOpen(InvoiceId),

    /// Payment status or unallocated amount does not permit allocation.
    #[error("Payment {0} cannot be allocated")]
    PaymentNotAllocatable(PaymentId),

    /// Strategy options are inconsistent (e.g. percentages above 100).
    #[error("Invalid allocation strategy options: {0}")]
    InvalidStrategyOptions(String),

    // ========== Lookup Errors ==========
    /// Payment not found in the caller's company.
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// Invoice not found in the caller's company.
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    /// Allocation entry not found in the caller's company.
    #[error("Allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    // ========== Payment Lifecycle Errors ==========
    /// Allocation has already been reversed.
    #[error("Allocation {0} has already been reversed")]
    AllocationAlreadyReversed(AllocationId),

    /// New payment amount is below what is already allocated.
    #[error("Payment amount {amount} is below allocated amount {allocated}")]
    AmountBelowAllocated {
        /// Proposed payment amount.
        amount: Decimal,
        /// Sum of active allocation entries.
        allocated: Decimal,
    },

    /// Payment still has active allocation entries.
    #[error("Payment {0} has active allocations")]
    HasActiveAllocations(PaymentId),

    /// Cancelled payments are immutable.
    #[error("Cannot modify cancelled payment {0}")]
    CannotModifyCancelled(PaymentId),

    /// Payment is already cancelled or failed.
    #[error("Payment {payment_id} cannot be voided from status {status}")]
    PaymentNotVoidable {
        /// The payment.
        payment_id: PaymentId,
        /// Its current status.
        status: PaymentStatus,
    },

    /// Only completed payments can be refunded.
    #[error("Payment {payment_id} cannot be refunded from status {status}")]
    PaymentNotRefundable {
        /// The payment.
        payment_id: PaymentId,
        /// Its current status.
        status: PaymentStatus,
    },

    /// Refund amount exceeds the unallocated amount.
    #[error("Refund amount {requested} exceeds unallocated amount {available}")]
    OverRefund {
        /// Requested refund.
        requested: Decimal,
        /// Unallocated amount on the payment.
        available: Decimal,
    },

    /// Status transition is not allowed.
    #[error("Invalid payment status transition from {from} to {to}")]
    InvalidPaymentTransition {
        /// Current status.
        from: PaymentStatus,
        /// Attempted status.
        to: PaymentStatus,
    },

    /// Document number prefix is empty or contains unsupported characters.
    #[error("Invalid document number prefix: {0:?}")]
    InvalidPrefix(String),

    /// Invoice input is inconsistent (dates out of order, a discount above the
    /// line amount, an amount out of range).
    #[error("Invalid invoice: {0}")]
    InvalidInvoiceInput(String),

    // ========== Authorization & Idempotency ==========
    /// Caller may not act on the company.
    #[error("Not permitted to act on this company")]
    Forbidden,

    /// The (idempotency key, action) pair was already recorded.
    #[error("Duplicate request {idempotency_key} for action {action}")]
    DuplicateRequest {
        /// Audit action name.
        action: String,
        /// Caller-supplied idempotency key.
        idempotency_key: String,
    },

    // ========== Concurrency Errors ==========
    /// A row lock could not be acquired within the configured timeout.
    #[error("Lock timeout, please retry")]
    LockTimeout,

    /// Serialization failure or deadlock.
    #[error("Serialization failure, please retry")]
    SerializationFailure,

    // ========== Integrity Errors ==========
    /// A ledger invariant was found broken inside a transaction.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    // ========== Infrastructure Errors ==========
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockTimeout | Self::SerializationFailure => ErrorKind::Concurrency,
            Self::IntegrityViolation(_) => ErrorKind::Integrity,
            Self::Database(_) | Self::Internal(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Validation,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyRequest => "EMPTY_REQUEST",
            Self::NegativeAmount => "NEGATIVE_AMOUNT",
            Self::OverAllocation { .. } => "OVER_ALLOCATION",
            Self::InvalidInvoice(_) => "INVALID_INVOICE",
            Self::ExceedsInvoiceBalance { .. } => "EXCEEDS_INVOICE_BALANCE",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::InvoiceNotOpen(_) => "INVOICE_NOT_OPEN",
            Self::PaymentNotAllocatable(_) => "PAYMENT_NOT_ALLOCATABLE",
            Self::InvalidStrategyOptions(_) => "INVALID_STRATEGY_OPTIONS",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::InvoiceNotFound(_) => "INVOICE_NOT_FOUND",
            Self::AllocationNotFound(_) => "ALLOCATION_NOT_FOUND",
            Self::AllocationAlreadyReversed(_) => "ALLOCATION_ALREADY_REVERSED",
            Self::AmountBelowAllocated { .. } => "AMOUNT_BELOW_ALLOCATED",
            Self::HasActiveAllocations(_) => "HAS_ACTIVE_ALLOCATIONS",
            Self::CannotModifyCancelled(_) => "CANNOT_MODIFY_CANCELLED",
            Self::PaymentNotVoidable { .. } => "PAYMENT_NOT_VOIDABLE",
            Self::PaymentNotRefundable { .. } => "PAYMENT_NOT_REFUNDABLE",
            Self::OverRefund { .. } => "OVER_REFUND",
            Self::InvalidPaymentTransition { .. } => "INVALID_PAYMENT_TRANSITION",
            Self::InvalidPrefix(_) => "INVALID_PREFIX",
            Self::InvalidInvoiceInput(_) => "INVALID_INVOICE_INPUT",
            Self::Forbidden => "FORBIDDEN",
            Self::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::SerializationFailure => "SERIALIZATION_FAILURE",
            Self::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 403 Forbidden
            Self::Forbidden => 403,

            // 404 Not Found
            Self::PaymentNotFound(_) | Self::InvoiceNotFound(_) | Self::AllocationNotFound(_) => {
                404
            }

            // 409 Conflict - duplicates and concurrency errors
            Self::DuplicateRequest { .. } | Self::LockTimeout | Self::SerializationFailure => 409,

            // 500 Internal Server Error
            Self::IntegrityViolation(_) | Self::Database(_) | Self::Internal(_) => 500,

            // 400 Bad Request - validation errors
            _ => 400,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }

    /// Checks a ledger invariant.
    ///
    /// A broken invariant is logged at `error`. Debug and test builds then
    /// panic; release builds return [`EngineError::IntegrityViolation`] and the
    /// caller's transaction rolls back.
    pub fn ensure_integrity(holds: bool, message: impl FnOnce() -> String) -> Result<(), Self> {
        if holds {
            return Ok(());
        }
        let message = message();
        tracing::error!(violation = %message, "Ledger integrity violation");
        debug_assert!(holds, "integrity violation: {message}");
        Err(Self::IntegrityViolation(message))
    }
}
