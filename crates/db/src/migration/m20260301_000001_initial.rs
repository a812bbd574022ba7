//! Initial database migration.
//!
//! Creates the enums, ledger tables, numbering counters, audit trail and the
//! guard triggers that keep allocation entries and audit entries immutable.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: PAYMENTS & INVOICES
        // ============================================================
        db.execute_unprepared(PAYMENTS_SQL).await?;
        db.execute_unprepared(INVOICES_SQL).await?;
        db.execute_unprepared(INVOICE_LINE_ITEMS_SQL).await?;
        db.execute_unprepared(CREDIT_NOTE_APPLICATIONS_SQL).await?;

        // ============================================================
        // PART 3: ALLOCATION LEDGER
        // ============================================================
        db.execute_unprepared(PAYMENT_ALLOCATIONS_SQL).await?;

        // ============================================================
        // PART 4: AUDIT TRAIL & NUMBERING
        // ============================================================
        db.execute_unprepared(AUDIT_LOG_ENTRIES_SQL).await?;
        db.execute_unprepared(IDEMPOTENCY_KEYS_SQL).await?;
        db.execute_unprepared(DOCUMENT_SEQUENCES_SQL).await?;

        // ============================================================
        // PART 5: GUARD TRIGGERS
        // ============================================================
        db.execute_unprepared(FUNCTIONS_SQL).await?;
        db.execute_unprepared(TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE payment_status AS ENUM ('pending', 'completed', 'failed', 'cancelled');

CREATE TYPE payment_method AS ENUM (
    'cash',
    'check',
    'bank_transfer',
    'credit_card',
    'debit_card',
    'paypal',
    'stripe',
    'other'
);

CREATE TYPE invoice_status AS ENUM ('draft', 'sent', 'posted', 'paid', 'cancelled');

CREATE TYPE invoice_payment_status AS ENUM ('unpaid', 'partially_paid', 'paid', 'overdue');

CREATE TYPE allocation_method AS ENUM ('manual', 'automatic');

-- Refund entries have no invoice
CREATE TYPE allocation_entry_kind AS ENUM ('allocation', 'refund');
";

const PAYMENTS_SQL: &str = r"
CREATE TABLE payments (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    company_id UUID NOT NULL,
    customer_id UUID NOT NULL,
    payment_number VARCHAR(50) NOT NULL,
    currency VARCHAR(3) NOT NULL,
    amount NUMERIC(19, 4) NOT NULL,
    status payment_status NOT NULL DEFAULT 'pending',
    payment_method payment_method NOT NULL,
    payment_date DATE NOT NULL,
    reference_number VARCHAR(100),
    processor_reference VARCHAR(255),
    notes TEXT,
    completed_at TIMESTAMPTZ,
    voided_at TIMESTAMPTZ,
    void_reason TEXT,
    created_by_user_id UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (company_id, payment_number),
    UNIQUE (id, company_id),
    CONSTRAINT chk_payment_amount_positive CHECK (amount > 0),
    CONSTRAINT chk_payment_currency CHECK (currency ~ '^[A-Z]{3}$')
);

CREATE INDEX idx_payments_company_customer ON payments(company_id, customer_id);
CREATE INDEX idx_payments_company_status ON payments(company_id, status);
";

const INVOICES_SQL: &str = r"
CREATE TABLE invoices (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    company_id UUID NOT NULL,
    customer_id UUID NOT NULL,
    invoice_number VARCHAR(50) NOT NULL,
    currency VARCHAR(3) NOT NULL,
    subtotal NUMERIC(19, 4) NOT NULL DEFAULT 0,
    tax_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    total_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    paid_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    credited_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    balance_due NUMERIC(19, 4) NOT NULL DEFAULT 0,
    status invoice_status NOT NULL DEFAULT 'draft',
    payment_status invoice_payment_status NOT NULL DEFAULT 'unpaid',
    issue_date DATE NOT NULL,
    due_date DATE NOT NULL,
    paid_at TIMESTAMPTZ,
    overdue_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (company_id, invoice_number),
    UNIQUE (id, company_id),
    CONSTRAINT chk_invoice_balance_non_negative CHECK (balance_due >= 0),
    CONSTRAINT chk_invoice_total_non_negative CHECK (total_amount >= 0),
    CONSTRAINT chk_invoice_currency CHECK (currency ~ '^[A-Z]{3}$'),
    CONSTRAINT chk_invoice_dates CHECK (due_date >= issue_date)
);

CREATE INDEX idx_invoices_company_customer ON invoices(company_id, customer_id);
CREATE INDEX idx_invoices_open ON invoices(company_id, customer_id, due_date)
    WHERE balance_due > 0 AND status NOT IN ('draft', 'cancelled');
";

const INVOICE_LINE_ITEMS_SQL: &str = r"
CREATE TABLE invoice_line_items (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    invoice_id UUID NOT NULL,
    company_id UUID NOT NULL,
    line_number INTEGER NOT NULL,
    description TEXT NOT NULL,
    quantity NUMERIC(19, 4) NOT NULL DEFAULT 1,
    unit_price NUMERIC(19, 4) NOT NULL,
    discount_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    tax_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    FOREIGN KEY (invoice_id, company_id) REFERENCES invoices(id, company_id) ON DELETE CASCADE,
    UNIQUE (invoice_id, line_number),
    CONSTRAINT chk_line_quantity_positive CHECK (quantity > 0),
    CONSTRAINT chk_line_amounts_non_negative CHECK (
        unit_price >= 0 AND discount_amount >= 0 AND tax_amount >= 0
    )
);
";

const CREDIT_NOTE_APPLICATIONS_SQL: &str = r"
CREATE TABLE credit_note_applications (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    company_id UUID NOT NULL,
    invoice_id UUID NOT NULL,
    credit_note_id UUID NOT NULL,
    applied_amount NUMERIC(19, 4) NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    reversed_at TIMESTAMPTZ,
    FOREIGN KEY (invoice_id, company_id) REFERENCES invoices(id, company_id),
    CONSTRAINT chk_credit_amount_positive CHECK (applied_amount > 0)
);

CREATE INDEX idx_credit_apps_invoice_active ON credit_note_applications(invoice_id)
    WHERE reversed_at IS NULL;
";

const PAYMENT_ALLOCATIONS_SQL: &str = r"
CREATE TABLE payment_allocations (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    company_id UUID NOT NULL,
    payment_id UUID NOT NULL,
    invoice_id UUID,
    entry_kind allocation_entry_kind NOT NULL DEFAULT 'allocation',
    allocated_amount NUMERIC(19, 4) NOT NULL,
    allocation_date DATE NOT NULL DEFAULT CURRENT_DATE,
    allocation_method allocation_method NOT NULL DEFAULT 'manual',
    allocation_strategy VARCHAR(32),
    notes TEXT,
    reversed_at TIMESTAMPTZ,
    reversal_reason TEXT,
    created_by_user_id UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    -- Composite keys keep payment, invoice and entry in one company
    FOREIGN KEY (payment_id, company_id) REFERENCES payments(id, company_id) ON DELETE CASCADE,
    FOREIGN KEY (invoice_id, company_id) REFERENCES invoices(id, company_id),
    CONSTRAINT chk_allocation_amount_positive CHECK (allocated_amount > 0),
    CONSTRAINT chk_refund_has_no_invoice CHECK ((entry_kind = 'refund') = (invoice_id IS NULL))
);

CREATE INDEX idx_allocations_payment_active ON payment_allocations(payment_id)
    WHERE reversed_at IS NULL;
CREATE INDEX idx_allocations_invoice_active ON payment_allocations(invoice_id)
    WHERE reversed_at IS NULL AND invoice_id IS NOT NULL;
CREATE INDEX idx_allocations_company ON payment_allocations(company_id, created_at);
";

const AUDIT_LOG_ENTRIES_SQL: &str = r"
CREATE TABLE audit_log_entries (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    action VARCHAR(64) NOT NULL,
    company_id UUID NOT NULL,
    user_id UUID,
    idempotency_key VARCHAR(255) NOT NULL,
    params JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_audit_company_key ON audit_log_entries(company_id, idempotency_key, action);
CREATE INDEX idx_audit_company_created ON audit_log_entries(company_id, created_at);
";

const IDEMPOTENCY_KEYS_SQL: &str = r"
CREATE TABLE idempotency_keys (
    company_id UUID NOT NULL,
    idempotency_key VARCHAR(255) NOT NULL,
    action VARCHAR(64) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (company_id, idempotency_key, action)
);
";

const DOCUMENT_SEQUENCES_SQL: &str = r"
CREATE TABLE document_sequences (
    company_id UUID NOT NULL,
    document_kind VARCHAR(16) NOT NULL,
    prefix VARCHAR(16) NOT NULL,
    year INTEGER NOT NULL,
    last_value BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (company_id, document_kind, prefix, year),
    CONSTRAINT chk_sequence_non_negative CHECK (last_value >= 0)
);
";

const FUNCTIONS_SQL: &str = r"
-- Allocation entries only ever gain reversal fields
CREATE OR REPLACE FUNCTION prevent_allocation_mutation()
RETURNS TRIGGER AS $$
BEGIN
    IF OLD.reversed_at IS NOT NULL THEN
        RAISE EXCEPTION 'Allocation % is already reversed', OLD.id;
    END IF;

    IF NEW.payment_id <> OLD.payment_id
        OR NEW.invoice_id IS DISTINCT FROM OLD.invoice_id
        OR NEW.company_id <> OLD.company_id
        OR NEW.entry_kind <> OLD.entry_kind
        OR NEW.allocated_amount <> OLD.allocated_amount THEN
        RAISE EXCEPTION 'Allocation % can only be reversed', OLD.id;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION prevent_audit_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'Audit log entries are append-only';
END;
$$ LANGUAGE plpgsql;
";

const TRIGGERS_SQL: &str = r"
CREATE TRIGGER trg_prevent_allocation_mutation
    BEFORE UPDATE ON payment_allocations
    FOR EACH ROW EXECUTE FUNCTION prevent_allocation_mutation();

CREATE TRIGGER trg_prevent_audit_mutation
    BEFORE UPDATE OR DELETE ON audit_log_entries
    FOR EACH ROW EXECUTE FUNCTION prevent_audit_mutation();
";

const DROP_ALL_SQL: &str = r"
-- ============================================================
-- DROP ALL: Rollback migration
-- Order matters due to foreign key constraints
-- ============================================================

DROP TRIGGER IF EXISTS trg_prevent_audit_mutation ON audit_log_entries;
DROP TRIGGER IF EXISTS trg_prevent_allocation_mutation ON payment_allocations;

DROP FUNCTION IF EXISTS prevent_audit_mutation();
DROP FUNCTION IF EXISTS prevent_allocation_mutation();

DROP TABLE IF EXISTS document_sequences CASCADE;
DROP TABLE IF EXISTS idempotency_keys CASCADE;
DROP TABLE IF EXISTS audit_log_entries CASCADE;
DROP TABLE IF EXISTS payment_allocations CASCADE;
DROP TABLE IF EXISTS credit_note_applications CASCADE;
DROP TABLE IF EXISTS invoice_line_items CASCADE;
DROP TABLE IF EXISTS invoices CASCADE;
DROP TABLE IF EXISTS payments CASCADE;

DROP TYPE IF EXISTS allocation_entry_kind;
DROP TYPE IF EXISTS allocation_method;
DROP TYPE IF EXISTS invoice_payment_status;
DROP TYPE IF EXISTS invoice_status;
DROP TYPE IF EXISTS payment_method;
DROP TYPE IF EXISTS payment_status;
";
