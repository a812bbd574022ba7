//! Integration tests for database triggers.
//!
//! These tests verify that PostgreSQL triggers keep allocation entries and the
//! audit trail immutable, even when writes bypass the repositories.

#![allow(clippy::uninlined_format_args)]

mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, sea_query::Expr};
use settle_core::allocation::AllocationRequest;
use settle_db::entities::{audit_log_entries, payment_allocations};

use common::Fixture;

#[tokio::test]
async fn test_trigger_rejects_allocation_amount_change() {
    let Some(db) = common::connect().await else {
        return;
    };
    let fixture = Fixture::new(db);

    let invoice = fixture.invoice(dec!(100)).await;
    let payment = fixture
        .payment_with(
            dec!(100),
            settle_core::payment::PaymentMethod::Cash,
            vec![AllocationRequest::new(invoice, dec!(40))],
        )
        .await;

    let update_result = payment_allocations::Entity::update_many()
        .col_expr(
            payment_allocations::Column::AllocatedAmount,
            Expr::value(dec!(90)),
        )
        .filter(payment_allocations::Column::PaymentId.eq(payment.into_inner()))
        .exec(&fixture.db)
        .await;

    assert!(
        update_result.is_err(),
        "Trigger should reject changing an allocated amount"
    );
    if let Err(e) = update_result {
        assert!(
            e.to_string().contains("can only be reversed"),
            "Error should mention reversal: {}",
            e
        );
    }

    fixture.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_trigger_rejects_second_reversal() {
    let Some(db) = common::connect().await else {
        return;
    };
    let fixture = Fixture::new(db);

    let invoice = fixture.invoice(dec!(100)).await;
    let payment = fixture
        .payment_with(
            dec!(100),
            settle_core::payment::PaymentMethod::Cash,
            vec![AllocationRequest::new(invoice, dec!(40))],
        )
        .await;

    let entry = payment_allocations::Entity::find()
        .filter(payment_allocations::Column::PaymentId.eq(payment.into_inner()))
        .one(&fixture.db)
        .await
        .unwrap()
        .expect("Entry should exist");

    let mut first: payment_allocations::ActiveModel = entry.into();
    first.reversed_at = Set(Some(Utc::now().fixed_offset()));
    first.reversal_reason = Set(Some("First".to_string()));
    let reversed = first
        .update(&fixture.db)
        .await
        .expect("First reversal should be allowed");

    let mut second: payment_allocations::ActiveModel = reversed.into();
    second.reversal_reason = Set(Some("Second".to_string()));
    let result = second.update(&fixture.db).await;
    assert!(result.is_err(), "Trigger should reject a second reversal");
    if let Err(e) = result {
        assert!(
            e.to_string().contains("already reversed"),
            "Error should mention reversal: {}",
            e
        );
    }

    fixture.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_trigger_keeps_audit_log_append_only() {
    let Some(db) = common::connect().await else {
        return;
    };
    let fixture = Fixture::new(db);
    fixture.payment(dec!(10)).await;

    let company = fixture.company_id.into_inner();

    let update_result = audit_log_entries::Entity::update_many()
        .col_expr(audit_log_entries::Column::Action, Expr::value("tampered"))
        .filter(audit_log_entries::Column::CompanyId.eq(company))
        .exec(&fixture.db)
        .await;
    assert!(update_result.is_err(), "Audit entries must not be updated");

    let delete_result = audit_log_entries::Entity::delete_many()
        .filter(audit_log_entries::Column::CompanyId.eq(company))
        .exec(&fixture.db)
        .await;
    assert!(delete_result.is_err(), "Audit entries must not be deleted");
    if let Err(e) = delete_result {
        assert!(
            e.to_string().contains("append-only"),
            "Error should mention the audit trail: {}",
            e
        );
    }

    fixture.cleanup().await.unwrap();
}
