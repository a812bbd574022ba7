//! `SeaORM` entities for the payment allocation ledger.

#![allow(missing_docs)]

pub mod prelude;

pub mod audit_log_entries;
pub mod credit_note_applications;
pub mod document_sequences;
pub mod idempotency_keys;
pub mod invoice_line_items;
pub mod invoices;
pub mod payment_allocations;
pub mod payments;
pub mod sea_orm_active_enums;
