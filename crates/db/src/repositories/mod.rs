//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for the engine operations, hiding
//! the `SeaORM` implementation details, row locking and audit writes from
//! callers.

pub mod allocation;
mod audit;
pub mod invoice;
mod ledger;
pub mod numbering;
pub mod payment;

pub use allocation::AllocationRepository;
pub use invoice::{CreateInvoiceInput, CreateLineItemInput, InvoiceRepository, InvoiceWithLines};
pub use numbering::NumberingRepository;
pub use payment::{PaymentRepository, PaymentWithAllocations};
