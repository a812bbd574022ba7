//! Row-level security for every company-scoped table.
//!
//! Policies read `app.current_company_id`, which the engine sets with
//! `SET LOCAL` at the start of each transaction.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(ENABLE_RLS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DISABLE_RLS_SQL).await?;
        Ok(())
    }
}

const ENABLE_RLS_SQL: &str = r"
ALTER TABLE payments ENABLE ROW LEVEL SECURITY;
ALTER TABLE invoices ENABLE ROW LEVEL SECURITY;
ALTER TABLE invoice_line_items ENABLE ROW LEVEL SECURITY;
ALTER TABLE credit_note_applications ENABLE ROW LEVEL SECURITY;
ALTER TABLE payment_allocations ENABLE ROW LEVEL SECURITY;
ALTER TABLE audit_log_entries ENABLE ROW LEVEL SECURITY;
ALTER TABLE idempotency_keys ENABLE ROW LEVEL SECURITY;
ALTER TABLE document_sequences ENABLE ROW LEVEL SECURITY;

CREATE POLICY tenant_isolation ON payments
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON invoices
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON invoice_line_items
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON credit_note_applications
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON payment_allocations
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON audit_log_entries
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON idempotency_keys
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
CREATE POLICY tenant_isolation ON document_sequences
    USING (company_id = current_setting('app.current_company_id', true)::UUID);
";

const DISABLE_RLS_SQL: &str = r"
DROP POLICY IF EXISTS tenant_isolation ON document_sequences;
DROP POLICY IF EXISTS tenant_isolation ON idempotency_keys;
DROP POLICY IF EXISTS tenant_isolation ON audit_log_entries;
DROP POLICY IF EXISTS tenant_isolation ON payment_allocations;
DROP POLICY IF EXISTS tenant_isolation ON credit_note_applications;
DROP POLICY IF EXISTS tenant_isolation ON invoice_line_items;
DROP POLICY IF EXISTS tenant_isolation ON invoices;
DROP POLICY IF EXISTS tenant_isolation ON payments;

ALTER TABLE document_sequences DISABLE ROW LEVEL SECURITY;
ALTER TABLE idempotency_keys DISABLE ROW LEVEL SECURITY;
ALTER TABLE audit_log_entries DISABLE ROW LEVEL SECURITY;
ALTER TABLE payment_allocations DISABLE ROW LEVEL SECURITY;
ALTER TABLE credit_note_applications DISABLE ROW LEVEL SECURITY;
ALTER TABLE invoice_line_items DISABLE ROW LEVEL SECURITY;
ALTER TABLE invoices DISABLE ROW LEVEL SECURITY;
ALTER TABLE payments DISABLE ROW LEVEL SECURITY;
";
