//! Customer balance summary.
//!
//! Balances are grouped by currency; the engine never converts between them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use settle_shared::types::{CurrencyCode, CustomerId, InvoiceId};

use super::types::InvoicePaymentStatus;

/// An unsettled invoice as listed in a customer summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutstandingInvoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Document number.
    pub invoice_number: String,
    /// Invoice currency.
    pub currency: CurrencyCode,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
    /// Invoice total.
    pub total_amount: Decimal,
    /// Sum of active payment allocations.
    pub paid_amount: Decimal,
    /// Current balance due.
    pub balance_due: Decimal,
    /// Stored settlement status.
    pub payment_status: InvoicePaymentStatus,
    /// Days past due, zero when not yet due.
    pub days_overdue: i64,
}

/// Per-currency totals of a customer summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyBalance {
    /// Currency of every amount in this entry.
    pub currency: CurrencyCode,
    /// Number of unsettled invoices.
    pub open_invoices: usize,
    /// Sum of their balances due.
    pub total_balance_due: Decimal,
    /// Sum of their active payment allocations.
    pub total_allocated: Decimal,
    /// Money on completed payments not yet applied to anything.
    pub unallocated_payments: Decimal,
    /// What the customer still owes once unallocated money is applied.
    /// Negative when the customer is in credit.
    pub net_balance: Decimal,
}

/// What a customer owes and holds in unapplied payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerBalanceSummary {
    /// The customer.
    pub customer_id: CustomerId,
    /// Unsettled invoices, oldest due date first.
    pub invoices: Vec<OutstandingInvoice>,
    /// Totals per currency, ordered by currency code.
    pub balances: Vec<CurrencyBalance>,
}

impl CustomerBalanceSummary {
    /// Builds the summary from unsettled invoices and the unallocated amount
    /// of each completed payment.
    #[must_use]
    pub fn build(
        customer_id: CustomerId,
        mut invoices: Vec<OutstandingInvoice>,
        unallocated: &[(CurrencyCode, Decimal)],
    ) -> Self {
        invoices.sort_by_key(|i| (i.due_date, i.id));

        let mut by_currency: BTreeMap<String, CurrencyBalance> = BTreeMap::new();
        for invoice in &invoices {
            let balance = slot(&mut by_currency, &invoice.currency);
            balance.open_invoices += 1;
            balance.total_balance_due += invoice.balance_due;
            balance.total_allocated += invoice.paid_amount;
        }
        for (currency, amount) in unallocated {
            if *amount > Decimal::ZERO {
                slot(&mut by_currency, currency).unallocated_payments += *amount;
            }
        }

        let balances = by_currency
            .into_values()
            .map(|mut balance| {
                balance.net_balance = balance.total_balance_due - balance.unallocated_payments;
                balance
            })
            .collect();

        Self {
            customer_id,
            invoices,
            balances,
        }
    }
}

fn slot<'a>(
    map: &'a mut BTreeMap<String, CurrencyBalance>,
    currency: &CurrencyCode,
) -> &'a mut CurrencyBalance {
    map.entry(currency.as_str().to_string())
        .or_insert_with(|| CurrencyBalance {
            currency: currency.clone(),
            open_invoices: 0,
            total_balance_due: Decimal::ZERO,
            total_allocated: Decimal::ZERO,
            unallocated_payments: Decimal::ZERO,
            net_balance: Decimal::ZERO,
        })
}
