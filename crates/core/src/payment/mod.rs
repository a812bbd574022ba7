//! Payment lifecycle management.
//!
//! - `types` - Payment status, method, and create/update inputs
//! - `lifecycle` - Transition rules and preconditions

pub mod lifecycle;
pub mod types;

pub use lifecycle::PaymentLifecycle;
pub use types::{
    CreatePaymentInput, PaymentMethod, PaymentStatus, PaymentView, UpdatePaymentInput,
};
