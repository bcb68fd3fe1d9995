//! Seven-level precedence stack that turns a proposal plus guard verdicts into one decision.
//!
//! Levels run in order. Levels 1, 2 and 4 may stop the stack with HOLD; the rest only
//! narrow what level 6 may do. Every level touched appends one line to the reason chain.

use crate::domain::sku::{finite, SkuData};
use crate::optimizer::settings::OptimizerConfig;
use crate::optimizer::types::{
    DiagnosisResult, FinalDecision, GuardResult, GuardType, ModeResult, PriceAction,
    PriceRecommendation, Urgency,
};

const STOP_SIGNAL_GUARDS: [GuardType; 3] =
    [GuardType::ManualOverride, GuardType::DataGuard, GuardType::CooldownGuard];

const STOP_SIGNAL_CONFIDENCE: f64 = 0.95;
const PROHIBITION_CONFIDENCE: f64 = 0.9;
const FAMILY_CONFIDENCE: f64 = 0.85;

type Level = fn(&mut Resolution<'_>) -> Option<FinalDecision>;

const PRIORITY_LEVELS: [(u8, Level); 7] = [
    (1, stop_signals),
    (2, prohibitions),
    (3, gold_step_limit),
    (4, family_limit),
    (5, mode_direction),
    (6, optimization),
    (7, tactical),
];

struct Outcome {
    action: PriceAction,
    delta_pct: f64,
    level: u8,
}

struct Resolution<'a> {
    sku: &'a SkuData,
    mode: &'a ModeResult,
    recommendation: &'a PriceRecommendation,
    diagnoses: &'a [DiagnosisResult],
    guards: &'a [GuardResult],
    config: &'a OptimizerConfig,
    is_gold_sku: bool,

    up_allowed: bool,
    down_allowed: bool,
    max_step: f64,
    outcome: Option<Outcome>,
    applied_rules: Vec<String>,
    blocked_by: Vec<GuardType>,
    reason_chain: Vec<String>,
}

impl Resolution<'_> {
    fn allows(&self, action: PriceAction) -> bool {
        match action {
            PriceAction::Up => self.up_allowed,
            PriceAction::Down => self.down_allowed,
            PriceAction::Hold => true,
        }
    }

    fn hard_stop(&mut self, level: u8, confidence: f64) -> FinalDecision {
        FinalDecision {
            action: PriceAction::Hold,
            delta_pct: 0.0,
            confidence,
            priority_level: level,
            applied_rules: std::mem::take(&mut self.applied_rules),
            blocked_by: std::mem::take(&mut self.blocked_by),
            reason_chain: std::mem::take(&mut self.reason_chain),
        }
    }

    fn confidence(&self) -> f64 {
        let mut confidence = 0.7;
        if self.sku.clicks > 100 {
            confidence += 0.05;
        }
        if self.sku.orders > 30 {
            confidence += 0.05;
        }
        if self.sku.clicks > 500 {
            confidence += 0.05;
        }
        let strongest = self
            .diagnoses
            .iter()
            .filter_map(|diagnosis| finite(diagnosis.confidence))
            .fold(0.0_f64, f64::max);
        confidence += 0.1 * strongest;
        confidence -= 0.02 * self.blocked_by.len() as f64;
        confidence.clamp(0.1, 0.99)
    }

    fn finish(mut self) -> FinalDecision {
        let outcome = self.outcome.take().unwrap_or(Outcome {
            action: PriceAction::Hold,
            delta_pct: 0.0,
            level: 6,
        });
        let confidence = self.confidence();
        FinalDecision {
            action: outcome.action,
            delta_pct: outcome.delta_pct,
            confidence,
            priority_level: outcome.level,
            applied_rules: self.applied_rules,
            blocked_by: self.blocked_by,
            reason_chain: self.reason_chain,
        }
    }
}

pub fn resolve_conflicts(
    sku: &SkuData,
    mode: &ModeResult,
    price_rec: &PriceRecommendation,
    diagnoses: &[DiagnosisResult],
    guards: &[GuardResult],
    config: &OptimizerConfig,
    is_gold_sku: bool,
) -> FinalDecision {
    let mut resolution = Resolution {
        sku,
        mode,
        recommendation: price_rec,
        diagnoses,
        guards,
        config,
        is_gold_sku,
        up_allowed: true,
        down_allowed: true,
        max_step: config.max_price_step_pct,
        outcome: None,
        applied_rules: Vec::new(),
        blocked_by: Vec::new(),
        reason_chain: Vec::new(),
    };

    let stopped = PRIORITY_LEVELS.iter().find_map(|(_, level)| level(&mut resolution));
    stopped.unwrap_or_else(|| resolution.finish())
}

fn blocking<'g>(
    guards: &'g [GuardResult],
    types: &'g [GuardType],
) -> impl Iterator<Item = &'g GuardResult> + 'g {
    guards.iter().filter(move |guard| guard.blocked && types.contains(&guard.guard))
}

fn stop_signals(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    let stops: Vec<(GuardType, String)> = blocking(resolution.guards, &STOP_SIGNAL_GUARDS)
        .map(|guard| (guard.guard, guard.reason.clone()))
        .collect();

    if stops.is_empty() {
        resolution.reason_chain.push("L1 stop signals: none".to_string());
        return None;
    }

    let detail = stops
        .iter()
        .map(|(guard, reason)| format!("{guard} ({reason})"))
        .collect::<Vec<_>>()
        .join("; ");
    resolution.reason_chain.push(format!("L1 stop signals: {detail} -> HOLD"));
    resolution.applied_rules.push("STOP_SIGNAL".to_string());
    resolution.blocked_by.extend(stops.into_iter().map(|(guard, _)| guard));
    Some(resolution.hard_stop(1, STOP_SIGNAL_CONFIDENCE))
}

/// Every directional veto outside the stop signals and the family limit narrows the
/// allowed set here, so a blocked direction can never be chosen later.
fn prohibitions(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    let prohibiting: Vec<&GuardResult> = resolution
        .guards
        .iter()
        .filter(|guard| guard.blocked)
        .filter(|guard| {
            !STOP_SIGNAL_GUARDS.contains(&guard.guard) && guard.guard != GuardType::FamilyGuard
        })
        .collect();

    let mut lines = Vec::new();
    let mut up_allowed = resolution.up_allowed;
    let mut down_allowed = resolution.down_allowed;
    let mut blocked_by = Vec::new();
    for guard in prohibiting {
        if guard.blocks(PriceAction::Up) {
            up_allowed = false;
        }
        if guard.blocks(PriceAction::Down) {
            down_allowed = false;
        }
        blocked_by.push(guard.guard);
        lines.push(format!("{} ({})", guard.guard, guard.reason));
    }
    resolution.up_allowed = up_allowed;
    resolution.down_allowed = down_allowed;

    if blocked_by.is_empty() {
        resolution.reason_chain.push("L2 prohibitions: none".to_string());
        return None;
    }

    resolution.blocked_by.extend(blocked_by);
    resolution.applied_rules.push("PROHIBITION".to_string());
    if !up_allowed && !down_allowed {
        resolution
            .reason_chain
            .push(format!("L2 prohibitions: {} -> both directions closed, HOLD", lines.join("; ")));
        return Some(resolution.hard_stop(2, PROHIBITION_CONFIDENCE));
    }

    let closed = match (up_allowed, down_allowed) {
        (false, _) => "UP",
        (_, false) => "DOWN",
        _ => "nothing",
    };
    resolution
        .reason_chain
        .push(format!("L2 prohibitions: {} -> {closed} closed", lines.join("; ")));
    None
}

fn gold_step_limit(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    if resolution.is_gold_sku {
        resolution.max_step = resolution.config.max_price_step_pct_gold;
        resolution.applied_rules.push("GOLD_STEP_LIMIT".to_string());
        resolution.reason_chain.push(format!(
            "L3 step limit: gold SKU, max step {:.1}%",
            resolution.max_step * 100.0
        ));
    } else {
        resolution.reason_chain.push(format!(
            "L3 step limit: max step {:.1}%",
            resolution.max_step * 100.0
        ));
    }
    None
}

fn family_limit(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    let Some(reason) = blocking(resolution.guards, &[GuardType::FamilyGuard])
        .next()
        .map(|guard| guard.reason.clone())
    else {
        resolution.reason_chain.push("L4 family: within daily limit".to_string());
        return None;
    };

    resolution.reason_chain.push(format!("L4 family: {reason} -> HOLD"));
    resolution.applied_rules.push("FAMILY_LIMIT".to_string());
    resolution.blocked_by.push(GuardType::FamilyGuard);
    Some(resolution.hard_stop(4, FAMILY_CONFIDENCE))
}

fn mode_direction(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    let preferred = resolution.mode.actions.price;
    let mode = resolution.mode.mode;

    if preferred == PriceAction::Hold || resolution.allows(preferred) {
        resolution.reason_chain.push(format!("L5 mode: {mode} prefers {preferred}"));
        return None;
    }

    resolution
        .reason_chain
        .push(format!("L5 mode: {mode} prefers {preferred}, prohibited -> HOLD"));
    resolution.applied_rules.push("MODE_DIRECTION".to_string());
    if resolution.recommendation.trigger.is_mode_driven() {
        resolution.outcome =
            Some(Outcome { action: PriceAction::Hold, delta_pct: 0.0, level: 5 });
    }
    None
}

fn optimization(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    if resolution.outcome.is_some() {
        return None;
    }

    let action = resolution.recommendation.action;
    let trigger = resolution.recommendation.trigger;
    let proposed = finite(resolution.recommendation.delta_pct).unwrap_or(0.0);

    if action == PriceAction::Hold {
        resolution.reason_chain.push(format!(
            "L6 optimization: no move proposed ({})",
            resolution.recommendation.reason
        ));
        resolution.outcome = Some(Outcome { action, delta_pct: 0.0, level: 6 });
        return None;
    }

    if !resolution.allows(action) {
        resolution
            .reason_chain
            .push(format!(
            "L6 optimization: {} proposes {action}, prohibited -> HOLD",
            trigger.as_str()
        ));
        resolution.outcome =
            Some(Outcome { action: PriceAction::Hold, delta_pct: 0.0, level: 6 });
        return None;
    }

    let max_step = resolution.max_step;
    let delta_pct = if proposed.abs() > max_step {
        resolution.applied_rules.push("STEP_CLAMP".to_string());
        action.sign() * max_step
    } else {
        proposed
    };
    resolution.applied_rules.push(format!("TRIGGER_{}", trigger.as_str()));
    resolution.reason_chain.push(format!(
        "L6 optimization: {} {action} {:+.1}% ({})",
        trigger.as_str(),
        delta_pct * 100.0,
        resolution.recommendation.reason
    ));
    resolution.outcome = Some(Outcome { action, delta_pct, level: 6 });
    None
}

fn tactical(resolution: &mut Resolution<'_>) -> Option<FinalDecision> {
    resolution.reason_chain.push("L7 tactical: pass-through".to_string());
    None
}

/// One-line rendering such as `UP +5.0% (level 6, confidence 84%)`.
pub fn format_decision(decision: &FinalDecision) -> String {
    let head = match decision.action {
        PriceAction::Hold => "HOLD".to_string(),
        action => format!("{action} {:+.1}%", decision.delta_pct * 100.0),
    };
    format!(
        "{head} (level {}, confidence {:.0}%)",
        decision.priority_level,
        decision.confidence * 100.0
    )
}

pub fn get_decision_summary(sku: &SkuData, mode: &ModeResult, decision: &FinalDecision) -> String {
    let mut summary = format!("{} [{}]: {}", sku.sku, mode.mode, format_decision(decision));
    if !decision.blocked_by.is_empty() {
        let guards =
            decision.blocked_by.iter().map(|guard| guard.as_str()).collect::<Vec<_>>().join(", ");
        summary.push_str(&format!("; blocked by {guards}"));
    }
    summary
}

pub fn is_actionable(decision: &FinalDecision) -> bool {
    decision.action != PriceAction::Hold && decision.delta_pct != 0.0
}

pub fn get_urgency(decision: &FinalDecision) -> Urgency {
    match (decision.priority_level <= 2, decision.action) {
        (true, PriceAction::Hold) => Urgency::Warning,
        (true, _) => Urgency::Critical,
        (false, PriceAction::Hold) => Urgency::Info,
        (false, PriceAction::Up) => Urgency::Success,
        (false, PriceAction::Down) => Urgency::Warning,
    }
}
