//! Automatic allocation planners.
//!
//! A planner turns "spread this amount over the customer's open invoices" into
//! an ordered request list. Planners never exceed the available amount or any
//! invoice's balance; the engine still validates the plan on locked rows.
//!
//! Splitting strategies use the Largest Remainder Method at storage precision
//! so the planned amounts add up to exactly the amount being split.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use settle_shared::types::{AMOUNT_SCALE, InvoiceId};

use super::types::{AllocationRequest, AllocationStrategy, StrategyOptions};
use crate::error::EngineError;
use crate::invoice::OpenInvoice;

/// Stateless allocation planner.
pub struct StrategyPlanner;

impl StrategyPlanner {
    /// Plans allocations of up to `unallocated` across `invoices`.
    ///
    /// Invoices with no balance are ignored. An empty plan is not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStrategyOptions` when the options do not fit the strategy.
    pub fn plan(
        strategy: AllocationStrategy,
        options: &StrategyOptions,
        invoices: &[OpenInvoice],
        unallocated: Decimal,
        today: NaiveDate,
    ) -> Result<Vec<AllocationRequest>, EngineError> {
        let available = Self::available(options, unallocated)?;
        let open: Vec<&OpenInvoice> = invoices
            .iter()
            .filter(|i| i.balance_due > Decimal::ZERO)
            .collect();

        if open.is_empty() || available <= Decimal::ZERO {
            return Ok(vec![]);
        }

        let plan = match strategy {
            AllocationStrategy::Fifo => Self::fill(Self::by_due_date(open), available),
            AllocationStrategy::LargestFirst => {
                let mut sorted = Self::by_due_date(open);
                sorted.sort_by_key(|i| Reverse(i.balance_due));
                Self::fill(sorted, available)
            }
            AllocationStrategy::OverdueFirst => {
                let (mut overdue, rest): (Vec<_>, Vec<_>) =
                    Self::by_due_date(open).into_iter().partition(|i| i.overdue);
                overdue.sort_by_key(|i| Reverse(i.days_overdue(today)));
                overdue.extend(rest);
                Self::fill(overdue, available)
            }
            AllocationStrategy::CustomPriority => {
                let rank: HashMap<InvoiceId, usize> = options
                    .priority
                    .iter()
                    .enumerate()
                    .map(|(pos, id)| (*id, pos))
                    .collect();
                let mut sorted = Self::by_due_date(open);
                sorted.sort_by_key(|i| rank.get(&i.id).copied().unwrap_or(usize::MAX));
                Self::fill(sorted, available)
            }
            AllocationStrategy::Proportional => Self::proportional(&open, available),
            AllocationStrategy::EqualDistribution => {
                let sorted = Self::by_due_date(open);
                let weights = vec![Decimal::ONE; sorted.len()];
                Self::capped(&sorted, &split_by_weights(available, &weights))
            }
            AllocationStrategy::PercentageBased => {
                Self::percentage_based(&open, &options.percentages, available)?
            }
        };

        Ok(plan)
    }

    fn available(options: &StrategyOptions, unallocated: Decimal) -> Result<Decimal, EngineError> {
        let available = match options.max_amount {
            Some(max) if max <= Decimal::ZERO => {
                return Err(EngineError::InvalidStrategyOptions(
                    "max_amount must be positive".to_string(),
                ));
            }
            Some(max) => max.min(unallocated),
            None => unallocated,
        };
        Ok(available.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
    }

    /// Oldest due date first, ties broken by id for a stable plan.
    fn by_due_date(mut invoices: Vec<&OpenInvoice>) -> Vec<&OpenInvoice> {
        invoices.sort_by_key(|i| (i.due_date, i.id));
        invoices
    }

    /// Pays invoices in order until the money runs out.
    fn fill(invoices: Vec<&OpenInvoice>, available: Decimal) -> Vec<AllocationRequest> {
        let mut remaining = available;
        let mut plan = Vec::new();

        for invoice in invoices {
            if remaining <= Decimal::ZERO {
                break;
            }
            let amount = remaining.min(invoice.balance_due);
            plan.push(AllocationRequest::new(invoice.id, amount));
            remaining -= amount;
        }

        plan
    }

    fn proportional(invoices: &[&OpenInvoice], available: Decimal) -> Vec<AllocationRequest> {
        let total_due: Decimal = invoices.iter().map(|i| i.balance_due).sum();
        if available >= total_due {
            return invoices
                .iter()
                .map(|i| AllocationRequest::new(i.id, i.balance_due))
                .collect();
        }

        let weights: Vec<Decimal> = invoices.iter().map(|i| i.balance_due).collect();
        Self::capped(invoices, &split_by_weights(available, &weights))
    }

    fn percentage_based(
        invoices: &[&OpenInvoice],
        percentages: &[(InvoiceId, Decimal)],
        available: Decimal,
    ) -> Result<Vec<AllocationRequest>, EngineError> {
        let hundred = Decimal::ONE_HUNDRED;
        let by_id: HashMap<InvoiceId, &OpenInvoice> =
            invoices.iter().map(|i| (i.id, *i)).collect();

        let mut seen = HashSet::with_capacity(percentages.len());
        let mut targets = Vec::with_capacity(percentages.len());
        let mut weights = Vec::with_capacity(percentages.len() + 1);
        for (invoice_id, pct) in percentages {
            if *pct <= Decimal::ZERO || *pct > hundred {
                return Err(EngineError::InvalidStrategyOptions(format!(
                    "percentage for invoice {invoice_id} must be within (0, 100]"
                )));
            }
            if !seen.insert(*invoice_id) {
                return Err(EngineError::InvalidStrategyOptions(format!(
                    "invoice {invoice_id} is listed more than once"
                )));
            }
            let Some(invoice) = by_id.get(invoice_id) else {
                return Err(EngineError::InvalidStrategyOptions(format!(
                    "invoice {invoice_id} is not an open invoice of the customer"
                )));
            };
            targets.push(*invoice);
            weights.push(*pct);
        }

        let listed: Decimal = weights.iter().copied().sum();
        if listed > hundred {
            return Err(EngineError::InvalidStrategyOptions(format!(
                "percentages add up to {listed}, above 100"
            )));
        }
        if listed < hundred {
            // Unassigned share stays on the payment.
            weights.push(hundred - listed);
        }

        let shares = split_by_weights(available, &weights);
        Ok(Self::capped(&targets, &shares[..targets.len()]))
    }

    /// Pairs invoices with shares, capping at each balance and dropping zeros.
    fn capped(invoices: &[&OpenInvoice], shares: &[Decimal]) -> Vec<AllocationRequest> {
        invoices
            .iter()
            .zip(shares)
            .map(|(i, share)| AllocationRequest::new(i.id, (*share).min(i.balance_due)))
            .filter(|r| r.amount > Decimal::ZERO)
            .collect()
    }
}

/// Splits `total` in proportion to `weights` using the Largest Remainder Method.
///
/// Every share is a multiple of the storage unit and the shares sum to `total`
/// exactly (once `total` is at storage precision). Remainder units go to the
/// largest fractional parts, earlier entries first on ties.
#[must_use]
pub fn split_by_weights(total: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    let weight_sum: Decimal = weights.iter().copied().sum();
    if weights.is_empty() || weight_sum <= Decimal::ZERO {
        return vec![Decimal::ZERO; weights.len()];
    }

    let unit = Decimal::new(1, AMOUNT_SCALE);
    let total = total.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero);

    let exact: Vec<Decimal> = weights
        .iter()
        .map(|w| weighted_share(total, *w, weight_sum))
        .collect();
    let mut shares: Vec<Decimal> = exact
        .iter()
        .map(|a| a.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
        .collect();

    let remainder = total - shares.iter().copied().sum::<Decimal>();
    let units = (remainder.abs() / unit)
        .round_dp_with_strategy(0, RoundingStrategy::ToZero)
        .to_usize()
        .unwrap_or(0);

    if units == 0 {
        return shares;
    }

    let mut fractions: Vec<(usize, Decimal)> = exact
        .iter()
        .zip(shares.iter())
        .enumerate()
        .map(|(i, (e, s))| (i, *e - *s))
        .collect();
    fractions.sort_by(|a, b| b.1.cmp(&a.1));

    if remainder > Decimal::ZERO {
        for (idx, _) in fractions.iter().take(units) {
            shares[*idx] += unit;
        }
    } else {
        // Ratio rounding overshot; take units back from the smallest fractions.
        let donors: Vec<usize> = fractions
            .iter()
            .rev()
            .map(|(idx, _)| *idx)
            .filter(|idx| shares[*idx] >= unit)
            .take(units)
            .collect();
        for idx in donors {
            shares[idx] -= unit;
        }
    }

    shares
}

/// `total * weight / weight_sum`, dividing first when the product would not
/// fit a `Decimal`.
fn weighted_share(total: Decimal, weight: Decimal, weight_sum: Decimal) -> Decimal {
    total
        .checked_mul(weight)
        .and_then(|product| product.checked_div(weight_sum))
        .unwrap_or_else(|| total * (weight / weight_sum))
}
