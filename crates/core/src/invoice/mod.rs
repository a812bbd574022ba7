//! Invoice balance tracking.
//!
//! - `types` - Invoice statuses, line items and calculator inputs/outputs
//! - `balance` - The invoice balance calculator
//! - `summary` - Per-customer outstanding balances

pub mod balance;
pub mod summary;
pub mod types;

#[cfg(test)]
mod balance_props;

pub use balance::InvoiceBalanceCalculator;
pub use summary::{CurrencyBalance, CustomerBalanceSummary, OutstandingInvoice};
pub use types::{
    BalanceInputs, InvoiceBalance, InvoicePaymentStatus, InvoiceState, InvoiceStatus,
    InvoiceView, LineItem, OpenInvoice,
};
