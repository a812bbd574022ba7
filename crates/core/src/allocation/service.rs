//! Allocation validation.
//!
//! Pure checks run against rows the database layer has already locked. The
//! order of checks is part of the contract: tenant and existence checks come
//! before any amount check, so a cross-company request is reported as
//! `InvalidInvoice` whatever its amounts.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use settle_shared::types::{InvoiceId, round_amount};

use super::types::{AllocationRequest, ValidatedAllocation};
use crate::error::EngineError;
use crate::invoice::InvoiceView;
use crate::payment::PaymentView;

/// Stateless allocation validator.
pub struct AllocationService;

impl AllocationService {
    /// Distinct invoice ids of `requests`, ascending. Rows must be locked in this order.
    #[must_use]
    pub fn invoice_lock_order(requests: &[AllocationRequest]) -> Vec<InvoiceId> {
        let mut ids: Vec<InvoiceId> = requests.iter().map(|r| r.invoice_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Amount still available on a payment.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityViolation` if active entries exceed the payment amount.
    pub fn unallocated_amount(
        payment_amount: Decimal,
        active_entries: Decimal,
    ) -> Result<Decimal, EngineError> {
        let unallocated = payment_amount - active_entries;
        EngineError::ensure_integrity(unallocated >= Decimal::ZERO, || {
            format!("active entries {active_entries} exceed payment amount {payment_amount}")
        })?;
        Ok(unallocated)
    }

    /// Validates an allocation request against the locked payment and invoices.
    ///
    /// Checks, in order:
    /// 1. at least one request, every amount positive (`EmptyRequest`, `NegativeAmount`)
    /// 2. payment status allows allocation (`PaymentNotAllocatable`)
    /// 3. every invoice exists in the payment's company (`InvalidInvoice`)
    /// 4. payment has funds left (`PaymentNotAllocatable`)
    /// 5. total within unallocated amount (`OverAllocation`)
    /// 6. per-invoice total within balance due (`ExceedsInvoiceBalance`)
    /// 7. currencies match (`CurrencyMismatch`)
    /// 8. invoice not cancelled (`InvoiceNotOpen`)
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn validate(
        payment: &PaymentView,
        unallocated: Decimal,
        requests: &[AllocationRequest],
        invoices: &[InvoiceView],
    ) -> Result<ValidatedAllocation, EngineError> {
        if requests.is_empty() {
            return Err(EngineError::EmptyRequest);
        }

        let mut rounded = Vec::with_capacity(requests.len());
        for request in requests {
            if request.amount < Decimal::ZERO {
                return Err(EngineError::NegativeAmount);
            }
            let amount = round_amount(request.amount);
            if amount.is_zero() {
                return Err(EngineError::EmptyRequest);
            }
            rounded.push(AllocationRequest::new(request.invoice_id, amount));
        }

        if !payment.status.can_be_allocated() {
            return Err(EngineError::PaymentNotAllocatable(payment.id));
        }

        let by_id: HashMap<InvoiceId, &InvoiceView> =
            invoices.iter().map(|i| (i.id, i)).collect();
        for request in &rounded {
            match by_id.get(&request.invoice_id) {
                Some(invoice) if invoice.company_id == payment.company_id => {}
                _ => return Err(EngineError::InvalidInvoice(request.invoice_id)),
            }
        }

        if unallocated <= Decimal::ZERO {
            return Err(EngineError::PaymentNotAllocatable(payment.id));
        }

        let total: Decimal = rounded.iter().map(|r| r.amount).sum();
        if total > unallocated {
            return Err(EngineError::OverAllocation {
                requested: total,
                available: unallocated,
            });
        }

        let mut per_invoice: BTreeMap<InvoiceId, Decimal> = BTreeMap::new();
        for request in &rounded {
            *per_invoice.entry(request.invoice_id).or_default() += request.amount;
        }

        for (invoice_id, requested) in &per_invoice {
            let invoice = by_id[invoice_id];
            if *requested > invoice.balance_due {
                return Err(EngineError::ExceedsInvoiceBalance {
                    invoice_id: *invoice_id,
                    requested: *requested,
                    balance_due: invoice.balance_due,
                });
            }
        }

        for invoice_id in per_invoice.keys() {
            let invoice = by_id[invoice_id];
            if invoice.currency != payment.currency {
                return Err(EngineError::CurrencyMismatch {
                    payment: payment.currency.to_string(),
                    invoice: invoice.currency.to_string(),
                });
            }
        }

        for invoice_id in per_invoice.keys() {
            if !by_id[invoice_id].status.accepts_allocations() {
                return Err(EngineError::InvoiceNotOpen(*invoice_id));
            }
        }

        Ok(ValidatedAllocation {
            requests: rounded,
            total,
            invoice_ids: per_invoice.into_keys().collect(),
        })
    }

    /// How many entries, taken newest first, to reverse under `max_amount`.
    ///
    /// Entries are taken while their running total stays within the limit;
    /// without a limit every entry is taken.
    ///
    /// # Errors
    ///
    /// Returns `NegativeAmount` if `max_amount` is not positive.
    pub fn reversal_count(
        newest_first: &[Decimal],
        max_amount: Option<Decimal>,
    ) -> Result<usize, EngineError> {
        let Some(max) = max_amount else {
            return Ok(newest_first.len());
        };
        if max <= Decimal::ZERO {
            return Err(EngineError::NegativeAmount);
        }

        let mut total = Decimal::ZERO;
        Ok(newest_first
            .iter()
            .take_while(|amount| {
                total += **amount;
                total <= max
            })
            .count())
    }
}
