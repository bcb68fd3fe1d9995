//! Price proposal before guards: three metric triggers plus mode-forced moves.

use serde::{Deserialize, Serialize};

use crate::domain::sku::{finite, SkuData};
use crate::optimizer::diagnostics::has_action_hint;
use crate::optimizer::settings::OptimizerConfig;
use crate::optimizer::types::{
    ActionHint, DiagnosisCode, DiagnosisResult, Mode, ModeResult, PriceAction, PriceImpact,
    PriceRecommendation, PriceTrigger,
};

pub const DEFAULT_ELASTICITY: f64 = -1.5;

/// Candidate price moves swept for the forward-looking scenario table.
pub const SCENARIO_DELTAS: [f64; 5] = [-0.10, -0.05, 0.0, 0.03, 0.05];

struct PriceContext<'a> {
    sku: &'a SkuData,
    mode: &'a ModeResult,
    diagnoses: &'a [DiagnosisResult],
    config: &'a OptimizerConfig,
}

struct Proposal {
    action: PriceAction,
    step: f64,
    ttl_days: u32,
    reason: String,
}

struct PriceRule {
    trigger: PriceTrigger,
    matches: fn(&PriceContext<'_>) -> bool,
    propose: fn(&PriceContext<'_>) -> Proposal,
}

/// Evaluated in order; the first matching rule produces the recommendation.
const PRICE_RULES: [PriceRule; 5] = [
    PriceRule { trigger: PriceTrigger::ModeStop, matches: mode_is_stop, propose: stop_proposal },
    PriceRule { trigger: PriceTrigger::Clear, matches: mode_is_clear, propose: clear_proposal },
    PriceRule { trigger: PriceTrigger::LowStock, matches: low_stock, propose: low_stock_proposal },
    PriceRule {
        trigger: PriceTrigger::Overpriced,
        matches: overpriced,
        propose: overpriced_proposal,
    },
    PriceRule { trigger: PriceTrigger::ModeCow, matches: cow_converting, propose: cow_proposal },
];

pub fn evaluate_price(
    sku: &SkuData,
    mode: &ModeResult,
    diagnoses: &[DiagnosisResult],
    config: &OptimizerConfig,
    is_gold_sku: bool,
) -> PriceRecommendation {
    let context = PriceContext { sku, mode, diagnoses, config };

    let Some((trigger, proposal)) = PRICE_RULES
        .iter()
        .find(|rule| (rule.matches)(&context))
        .map(|rule| (rule.trigger, (rule.propose)(&context)))
    else {
        return PriceRecommendation::hold("no price trigger fired");
    };

    let mut step = proposal.step.abs();
    let mut reason = proposal.reason;
    if is_gold_sku && step > config.max_price_step_pct_gold {
        step = config.max_price_step_pct_gold;
        reason = format!("{reason} [gold: step limited to {:.1}%]", step * 100.0);
    }

    PriceRecommendation {
        action: proposal.action,
        delta_pct: proposal.action.sign() * step,
        trigger,
        ttl_days: proposal.ttl_days,
        reason,
        expected_impact: None,
    }
}

fn mode_is_stop(context: &PriceContext<'_>) -> bool {
    context.mode.mode == Mode::Stop
}

fn stop_proposal(context: &PriceContext<'_>) -> Proposal {
    Proposal {
        action: PriceAction::Up,
        step: context.config.price_step_low_stock,
        ttl_days: 14,
        reason: format!("STOP mode: restore margin ({})", context.mode.reason),
    }
}

fn mode_is_clear(context: &PriceContext<'_>) -> bool {
    context.mode.mode == Mode::Clear
}

fn clear_proposal(context: &PriceContext<'_>) -> Proposal {
    Proposal {
        action: PriceAction::Down,
        step: context.config.price_step_clear,
        ttl_days: 7,
        reason: format!("CLEAR mode: move overstock ({})", context.mode.reason),
    }
}

fn low_stock(context: &PriceContext<'_>) -> bool {
    let velocity = finite(context.sku.orders_per_day).unwrap_or(0.0);
    context.sku.stock_cover_days() <= context.config.stock_critical_days && velocity > 0.0
}

fn low_stock_proposal(context: &PriceContext<'_>) -> Proposal {
    Proposal {
        action: PriceAction::Up,
        step: context.config.price_step_low_stock,
        ttl_days: 7,
        reason: format!(
            "low stock: {:.1} days of cover (critical at {:.0})",
            context.sku.stock_cover_days(),
            context.config.stock_critical_days
        ),
    }
}

fn overpriced(context: &PriceContext<'_>) -> bool {
    let signalled = context
        .diagnoses
        .iter()
        .any(|diagnosis| diagnosis.code == DiagnosisCode::Overpriced)
        || has_action_hint(context.diagnoses, ActionHint::PriceDown);
    if !signalled {
        return false;
    }

    match (finite(context.sku.ctr), finite(context.sku.cr_order)) {
        (Some(ctr), Some(cr_order)) => {
            ctr >= context.config.ctr_benchmark && cr_order < context.config.cr_order_low
        }
        _ => false,
    }
}

fn overpriced_proposal(context: &PriceContext<'_>) -> Proposal {
    Proposal {
        action: PriceAction::Down,
        step: context.config.price_step_overpriced,
        ttl_days: 7,
        reason: format!(
            "overpriced: CTR {:.2}% is healthy but CR {:.2}% is below {:.2}%",
            context.sku.ctr, context.sku.cr_order, context.config.cr_order_low
        ),
    }
}

fn cow_converting(context: &PriceContext<'_>) -> bool {
    context.mode.mode == Mode::Cow
        && finite(context.sku.cr_order).is_some_and(|cr| cr > context.config.cr_order_high)
}

fn cow_proposal(context: &PriceContext<'_>) -> Proposal {
    // Uses the gold step for every SKU; kept as the established behaviour.
    Proposal {
        action: PriceAction::Up,
        step: context.config.max_price_step_pct_gold,
        ttl_days: 7,
        reason: format!(
            "COW mode with strong conversion ({:.2}% > {:.2}%): small increase",
            context.sku.cr_order, context.config.cr_order_high
        ),
    }
}

/// Estimated order and profit response to a relative price change.
pub fn calculate_price_impact(sku: &SkuData, delta_pct: f64, elasticity: f64) -> PriceImpact {
    let price = finite(sku.current_price).unwrap_or(0.0);
    let velocity = finite(sku.orders_per_day).unwrap_or(0.0).max(0.0);
    let unit_cost = sku.unit_cost().unwrap_or(0.0);
    let delta_pct = finite(delta_pct).unwrap_or(0.0);
    let elasticity = finite(elasticity).unwrap_or(DEFAULT_ELASTICITY);

    let new_price = price * (1.0 + delta_pct);
    let orders_delta_pct = delta_pct * elasticity;
    let expected_orders_per_day = (velocity * (1.0 + orders_delta_pct)).max(0.0);
    let current_profit = velocity * (price - unit_cost);
    let expected_profit_per_day = expected_orders_per_day * (new_price - unit_cost);

    PriceImpact {
        new_price,
        orders_delta_pct,
        expected_orders_per_day,
        expected_profit_per_day,
        profit_delta_per_day: expected_profit_per_day - current_profit,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceScenario {
    pub delta_pct: f64,
    pub impact: PriceImpact,
}

pub fn generate_price_scenarios(sku: &SkuData, elasticity: f64) -> Vec<PriceScenario> {
    SCENARIO_DELTAS
        .iter()
        .map(|delta_pct| PriceScenario {
            delta_pct: *delta_pct,
            impact: calculate_price_impact(sku, *delta_pct, elasticity),
        })
        .collect()
}

/// Scenario with the highest expected daily profit; ties keep the earlier candidate.
pub fn find_optimal_scenario(scenarios: &[PriceScenario]) -> Option<&PriceScenario> {
    scenarios.iter().fold(None, |best: Option<&PriceScenario>, scenario| match best {
        Some(current)
            if current.impact.expected_profit_per_day
                >= scenario.impact.expected_profit_per_day =>
        {
            Some(current)
        }
        _ => Some(scenario),
    })
}
