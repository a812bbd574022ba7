//! Entity re-exports.

pub use super::audit_log_entries::Entity as AuditLogEntries;
pub use super::credit_note_applications::Entity as CreditNoteApplications;
pub use super::document_sequences::Entity as DocumentSequences;
pub use super::idempotency_keys::Entity as IdempotencyKeys;
pub use super::invoice_line_items::Entity as InvoiceLineItems;
pub use super::invoices::Entity as Invoices;
pub use super::payment_allocations::Entity as PaymentAllocations;
pub use super::payments::Entity as Payments;
