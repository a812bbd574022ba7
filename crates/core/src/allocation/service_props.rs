//! Property-based tests for allocation validation and planning.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use settle_shared::types::{CompanyId, CurrencyCode, CustomerId, InvoiceId, PaymentId};
use uuid::Uuid;

use super::service::AllocationService;
use super::strategy::{StrategyPlanner, split_by_weights};
use super::types::{AllocationRequest, AllocationStrategy, StrategyOptions};
use crate::error::EngineError;
use crate::invoice::{InvoiceStatus, InvoiceView, OpenInvoice};
use crate::payment::{PaymentStatus, PaymentView};

/// Strategy for amounts from 0.0001 to 10,000.0000.
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

/// Strategy for amounts up to the `NUMERIC(19,4)` limit of 10^15.
fn large_amount() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64, 0i64..1_000_000_000_000_000i64).prop_map(|(high, low)| {
        Decimal::from_i128_with_scale(i128::from(high) * 1_000_000_000_000_000 + i128::from(low), 4)
    })
}

fn arb_strategy() -> impl Strategy<Value = AllocationStrategy> {
    prop_oneof![
        Just(AllocationStrategy::Fifo),
        Just(AllocationStrategy::Proportional),
        Just(AllocationStrategy::OverdueFirst),
        Just(AllocationStrategy::LargestFirst),
        Just(AllocationStrategy::EqualDistribution),
        Just(AllocationStrategy::CustomPriority),
    ]
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

/// Strategy for up to eight open invoices with distinct ids.
fn arb_open_invoices() -> impl Strategy<Value = Vec<OpenInvoice>> {
    prop::collection::vec((positive_amount(), -60i64..60i64, any::<bool>()), 0..8).prop_map(
        |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(n, (balance, offset, overdue))| OpenInvoice {
                    id: InvoiceId::from_uuid(Uuid::from_u128(n as u128 + 1)),
                    due_date: today() + Duration::days(offset),
                    balance_due: balance,
                    overdue,
                })
                .collect()
        },
    )
}

fn usd() -> CurrencyCode {
    "USD".parse().unwrap()
}

fn views(company_id: CompanyId, invoices: &[OpenInvoice]) -> Vec<InvoiceView> {
    invoices
        .iter()
        .map(|i| InvoiceView {
            id: i.id,
            company_id,
            currency: usd(),
            status: InvoiceStatus::Sent,
            balance_due: i.balance_due,
        })
        .collect()
}

fn payment(company_id: CompanyId, amount: Decimal) -> PaymentView {
    PaymentView {
        id: PaymentId::new(),
        company_id,
        customer_id: CustomerId::new(),
        currency: usd(),
        amount,
        status: PaymentStatus::Completed,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every plan stays within the available amount and each invoice balance.
    #[test]
    fn prop_plan_respects_limits(
        strategy in arb_strategy(),
        invoices in arb_open_invoices(),
        available in positive_amount(),
    ) {
        let plan = StrategyPlanner::plan(strategy, &StrategyOptions::default(), &invoices, available, today()).unwrap();

        let total: Decimal = plan.iter().map(|r| r.amount).sum();
        prop_assert!(total <= available, "planned {} over available {}", total, available);

        for request in &plan {
            prop_assert!(request.amount > Decimal::ZERO);
            let invoice = invoices.iter().find(|i| i.id == request.invoice_id).unwrap();
            prop_assert!(request.amount <= invoice.balance_due);
        }

        let mut ids: Vec<_> = plan.iter().map(|r| r.invoice_id).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), plan.len());
    }

    /// Sequential and proportional plans use min(available, total due) exactly.
    #[test]
    fn prop_greedy_plans_use_all_they_can(
        strategy in prop_oneof![
            Just(AllocationStrategy::Fifo),
            Just(AllocationStrategy::Proportional),
            Just(AllocationStrategy::LargestFirst),
            Just(AllocationStrategy::OverdueFirst),
        ],
        invoices in arb_open_invoices(),
        available in positive_amount(),
    ) {
        let plan = StrategyPlanner::plan(strategy, &StrategyOptions::default(), &invoices, available, today()).unwrap();
        let total_due: Decimal = invoices.iter().map(|i| i.balance_due).sum();
        let total: Decimal = plan.iter().map(|r| r.amount).sum();
        prop_assert_eq!(total, available.min(total_due));
    }

    /// Any plan passes engine validation on the same rows.
    #[test]
    fn prop_plans_validate(
        strategy in arb_strategy(),
        invoices in arb_open_invoices(),
        available in positive_amount(),
    ) {
        let company = CompanyId::new();
        let plan = StrategyPlanner::plan(strategy, &StrategyOptions::default(), &invoices, available, today()).unwrap();
        prop_assume!(!plan.is_empty());

        let result = AllocationService::validate(&payment(company, available), available, &plan, &views(company, &invoices));
        prop_assert!(result.is_ok(), "plan rejected: {:?}", result);
    }

    /// Requests above the unallocated amount are always rejected.
    #[test]
    fn prop_over_allocation_rejected(
        balance in positive_amount(),
        unallocated in positive_amount(),
        excess in positive_amount(),
    ) {
        let company = CompanyId::new();
        let invoice = OpenInvoice { id: InvoiceId::new(), due_date: today(), balance_due: balance + unallocated + excess, overdue: false };
        let requests = vec![AllocationRequest::new(invoice.id, unallocated + excess)];

        let result = AllocationService::validate(
            &payment(company, unallocated),
            unallocated,
            &requests,
            &views(company, std::slice::from_ref(&invoice)),
        );
        let is_over_allocation = matches!(result, Err(EngineError::OverAllocation { .. }));
        prop_assert!(is_over_allocation);
    }

    /// Cross-company invoices are rejected as invalid whatever the amount.
    #[test]
    fn prop_cross_company_always_invalid(
        amount in positive_amount(),
        unallocated in positive_amount(),
    ) {
        let invoice = OpenInvoice { id: InvoiceId::new(), due_date: today(), balance_due: amount, overdue: false };
        let requests = vec![AllocationRequest::new(invoice.id, amount)];

        let result = AllocationService::validate(
            &payment(CompanyId::new(), unallocated),
            unallocated,
            &requests,
            &views(CompanyId::new(), std::slice::from_ref(&invoice)),
        );
        let is_invalid_invoice = matches!(result, Err(EngineError::InvalidInvoice(id)) if id == invoice.id);
        prop_assert!(is_invalid_invoice);
    }

    /// Largest-remainder splits add up exactly.
    #[test]
    fn prop_split_sums_exactly(
        total in positive_amount(),
        weights in prop::collection::vec(positive_amount(), 1..10),
    ) {
        let shares = split_by_weights(total, &weights);
        prop_assert_eq!(shares.len(), weights.len());
        prop_assert_eq!(shares.iter().copied().sum::<Decimal>(), total);
        prop_assert!(shares.iter().all(|s| *s >= Decimal::ZERO));
    }

    /// Splitting stays exact for balances near the column limit.
    #[test]
    fn prop_large_amounts_split_exactly(
        total in large_amount(),
        weights in prop::collection::vec(large_amount(), 1..8),
    ) {
        let shares = split_by_weights(total, &weights);
        prop_assert_eq!(shares.iter().copied().sum::<Decimal>(), total);
        prop_assert!(shares.iter().all(|s| *s >= Decimal::ZERO));
    }

    /// Proportional plans over large balances never panic and stay in bounds.
    #[test]
    fn prop_proportional_large_balances(
        balances in prop::collection::vec(large_amount(), 1..8),
        available in large_amount(),
    ) {
        let invoices: Vec<OpenInvoice> = balances
            .iter()
            .enumerate()
            .map(|(n, balance)| OpenInvoice {
                id: InvoiceId::from_uuid(Uuid::from_u128(n as u128 + 1)),
                due_date: today(),
                balance_due: *balance,
                overdue: false,
            })
            .collect();
        let plan = StrategyPlanner::plan(AllocationStrategy::Proportional, &StrategyOptions::default(), &invoices, available, today()).unwrap();

        let total_due: Decimal = balances.iter().copied().sum();
        let total: Decimal = plan.iter().map(|r| r.amount).sum();
        prop_assert_eq!(total, available.min(total_due));
        for request in &plan {
            let invoice = invoices.iter().find(|i| i.id == request.invoice_id).unwrap();
            prop_assert!(request.amount <= invoice.balance_due);
        }
    }
}
