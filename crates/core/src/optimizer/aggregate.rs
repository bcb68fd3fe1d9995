//! Read-only projections over one batch of optimizer outputs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::optimizer::resolver::is_actionable;
use crate::optimizer::types::{GuardType, Mode, OptimizerOutput, PriceAction};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionStats {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub hold: usize,
    pub actionable: usize,
    /// Outputs whose decision names at least one blocking guard.
    pub blocked: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TotalImpact {
    pub skus_with_impact: usize,
    pub expected_orders_delta_per_day: f64,
    pub profit_delta_per_day: f64,
}

pub fn group_by_mode(outputs: &[OptimizerOutput]) -> BTreeMap<Mode, Vec<&OptimizerOutput>> {
    let mut groups: BTreeMap<Mode, Vec<&OptimizerOutput>> = BTreeMap::new();
    for output in outputs {
        groups.entry(output.mode.mode).or_default().push(output);
    }
    groups
}

pub fn get_action_stats(outputs: &[OptimizerOutput]) -> ActionStats {
    outputs.iter().fold(ActionStats::default(), |mut stats, output| {
        stats.total += 1;
        match output.decision.action {
            PriceAction::Up => stats.up += 1,
            PriceAction::Down => stats.down += 1,
            PriceAction::Hold => stats.hold += 1,
        }
        if is_actionable(&output.decision) {
            stats.actionable += 1;
        }
        if !output.decision.blocked_by.is_empty() {
            stats.blocked += 1;
        }
        stats
    })
}

/// Most urgent first, then by confidence and step size. Ties keep batch order.
pub fn get_top_priority_items(outputs: &[OptimizerOutput], limit: usize) -> Vec<&OptimizerOutput> {
    let mut ranked: Vec<&OptimizerOutput> = outputs.iter().collect();
    ranked.sort_by(|left, right| {
        left.urgency
            .cmp(&right.urgency)
            .then_with(|| right.decision.confidence.total_cmp(&left.decision.confidence))
            .then_with(|| {
                right.decision.delta_pct.abs().total_cmp(&left.decision.delta_pct.abs())
            })
    });
    ranked.truncate(limit);
    ranked
}

/// SKU codes held back by each guard type.
pub fn get_blocked_by_guard(outputs: &[OptimizerOutput]) -> BTreeMap<GuardType, Vec<String>> {
    let mut blocked: BTreeMap<GuardType, Vec<String>> = BTreeMap::new();
    for output in outputs {
        for guard in &output.decision.blocked_by {
            blocked.entry(*guard).or_default().push(output.sku.clone());
        }
    }
    blocked
}

/// Sums the estimated impact of actionable decisions at the step each decision settled on.
pub fn calculate_total_impact(outputs: &[OptimizerOutput]) -> TotalImpact {
    outputs
        .iter()
        .filter(|output| is_actionable(&output.decision))
        .filter_map(|output| {
            let impact = output.expected_impact.as_ref()?;
            let current_orders = if impact.orders_delta_pct > -1.0 {
                impact.expected_orders_per_day / (1.0 + impact.orders_delta_pct)
            } else {
                0.0
            };
            Some((impact.expected_orders_per_day - current_orders, impact.profit_delta_per_day))
        })
        .filter(|(orders, profit)| orders.is_finite() && profit.is_finite())
        .fold(TotalImpact::default(), |mut total, (orders, profit)| {
            total.skus_with_impact += 1;
            total.expected_orders_delta_per_day += orders;
            total.profit_delta_per_day += profit;
            total
        })
}
