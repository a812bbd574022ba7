//! Explicit per-call execution context.
//!
//! The engine never reads ambient session state. Every operation receives an
//! [`ExecutionContext`] naming the tenant, the acting user, the caller's
//! idempotency key and whether the caller may act on the tenant at all.

use settle_shared::types::{CompanyId, UserId};

use crate::error::EngineError;

/// Identity and scope of a single engine call. Read-only.
pub trait ExecutionContext: Send + Sync {
    /// Company (tenant) the call is scoped to.
    fn company_id(&self) -> CompanyId;

    /// Acting user, if the call was made on behalf of one.
    fn acting_user_id(&self) -> Option<UserId>;

    /// Caller-supplied key recorded on the audit entry.
    fn idempotency_key(&self) -> &str;

    /// Whether the caller holds the capability to mutate the company's receivables.
    fn may_act_on_company(&self) -> bool;
}

/// Plain [`ExecutionContext`] built by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    company_id: CompanyId,
    user_id: Option<UserId>,
    idempotency_key: String,
    may_act: bool,
}

impl ServiceContext {
    /// Creates a context that may act on `company_id`, with no acting user.
    #[must_use]
    pub fn new(company_id: CompanyId, idempotency_key: impl Into<String>) -> Self {
        Self {
            company_id,
            user_id: None,
            idempotency_key: idempotency_key.into(),
            may_act: true,
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets whether the caller may act on the company.
    #[must_use]
    pub fn with_permission(mut self, may_act: bool) -> Self {
        self.may_act = may_act;
        self
    }
}

impl ExecutionContext for ServiceContext {
    fn company_id(&self) -> CompanyId {
        self.company_id
    }

    fn acting_user_id(&self) -> Option<UserId> {
        self.user_id
    }

    fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    fn may_act_on_company(&self) -> bool {
        self.may_act
    }
}

/// Rejects callers without the capability to act on their company.
pub fn authorize(ctx: &dyn ExecutionContext) -> Result<(), EngineError> {
    if ctx.may_act_on_company() {
        Ok(())
    } else {
        Err(EngineError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_context_defaults() {
        let company = CompanyId::new();
        let ctx = ServiceContext::new(company, "key-1");
        assert_eq!(ctx.company_id(), company);
        assert_eq!(ctx.acting_user_id(), None);
        assert_eq!(ctx.idempotency_key(), "key-1");
        assert!(ctx.may_act_on_company());
        assert!(authorize(&ctx).is_ok());
    }

    #[test]
    fn test_service_context_with_user() {
        let user = UserId::new();
        let ctx = ServiceContext::new(CompanyId::new(), "key-2").with_user(user);
        assert_eq!(ctx.acting_user_id(), Some(user));
    }

    #[test]
    fn test_authorize_rejects_without_permission() {
        let ctx = ServiceContext::new(CompanyId::new(), "key-3").with_permission(false);
        assert!(matches!(authorize(&ctx), Err(EngineError::Forbidden)));
    }
}
