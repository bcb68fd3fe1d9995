//! Decision pipeline: config, then diagnostics, mode and price proposal, then guards,
//! then the resolver. Each stage only reads what earlier stages produced.

pub mod aggregate;
pub mod diagnostics;
pub mod guards;
pub mod mode;
pub mod price;
pub mod resolver;
pub mod settings;
pub mod types;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::domain::history::{family_changes_on, PriceChangeRecord};
use crate::domain::reference::FamilyDefinition;
use crate::domain::sku::SkuData;
use crate::optimizer::aggregate::get_action_stats;
use crate::optimizer::diagnostics::run_diagnostics;
use crate::optimizer::guards::{run_safety_guards, GuardOptions};
use crate::optimizer::mode::classify_mode;
use crate::optimizer::price::{calculate_price_impact, evaluate_price, DEFAULT_ELASTICITY};
use crate::optimizer::resolver::{
    get_decision_summary, get_urgency, is_actionable, resolve_conflicts,
};
use crate::optimizer::settings::{ConfigResolver, ConfigSource, ConfigTables};
use crate::optimizer::types::{OptimizerOutput, PriceAction};

/// Injected inputs shared by every SKU in a run.
#[derive(Clone, Debug)]
pub struct OptimizerContext<'a> {
    pub now: DateTime<Utc>,
    pub elasticity: f64,
    pub history: &'a [PriceChangeRecord],
}

impl<'a> OptimizerContext<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now, elasticity: DEFAULT_ELASTICITY, history: &[] }
    }

    pub fn with_history(mut self, history: &'a [PriceChangeRecord]) -> Self {
        self.history = history;
        self
    }

    pub fn with_elasticity(mut self, elasticity: f64) -> Self {
        self.elasticity = elasticity;
        self
    }
}

/// Actionable price changes per family for the current day.
///
/// Seeded from same-day history and bumped as the batch makes decisions, so later
/// members of a family see what earlier ones did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FamilyChangeCounter {
    counts: HashMap<String, u32>,
}

impl FamilyChangeCounter {
    pub fn seeded(
        history: &[PriceChangeRecord],
        families: &[FamilyDefinition],
        date: NaiveDate,
    ) -> Self {
        let counts = families
            .iter()
            .map(|family| (family.family_id.clone(), family_changes_on(history, family, date)))
            .filter(|(_, count)| *count > 0)
            .collect();
        Self { counts }
    }

    pub fn count(&self, family_id: &str) -> u32 {
        self.counts.get(family_id).copied().unwrap_or(0)
    }

    pub fn record(&mut self, family_id: &str) {
        let count = self.counts.entry(family_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }
}

/// Membership in a family's SKU list wins over the record's own `family_id`.
fn family_of<'t>(tables: &'t ConfigTables, sku: &SkuData) -> Option<&'t FamilyDefinition> {
    tables
        .family_for_sku(&sku.sku)
        .or_else(|| sku.family_id.as_deref().and_then(|id| tables.family_by_id(id)))
}

pub fn run_optimizer<S: ConfigSource>(
    sku: &SkuData,
    resolver: &ConfigResolver<S>,
    context: &OptimizerContext<'_>,
    family_changes: &FamilyChangeCounter,
) -> OptimizerOutput {
    let now = context.now;
    let tables = resolver.tables(now);
    let config = resolver.get_config(&sku.sku, &sku.category, now);
    let is_gold = tables.gold_skus.contains(&sku.sku);
    let manual_locked =
        tables.manual_locks.iter().any(|lock| lock.sku == sku.sku && lock.is_active(now));
    let family = family_of(&tables, sku);

    let diagnoses = run_diagnostics(sku, &config);
    let mode = classify_mode(sku, &config);
    debug!(
        event_name = "optimizer.stage.classified",
        sku = %sku.sku,
        mode = mode.mode.as_str(),
        diagnoses = diagnoses.len(),
        "diagnostics and mode computed"
    );

    let mut price_recommendation = evaluate_price(sku, &mode, &diagnoses, &config, is_gold);
    if price_recommendation.action != PriceAction::Hold {
        price_recommendation.expected_impact =
            Some(calculate_price_impact(sku, price_recommendation.delta_pct, context.elasticity));
    }

    let options = GuardOptions {
        now,
        is_gold,
        manual_locked,
        family,
        family_changes_today: family.map_or(0, |family| family_changes.count(&family.family_id)),
        history: context.history,
    };
    let guards = run_safety_guards(sku, &price_recommendation, &config, &options);
    let decision =
        resolve_conflicts(sku, &mode, &price_recommendation, &diagnoses, &guards, &config, is_gold);
    let expected_impact = is_actionable(&decision)
        .then(|| calculate_price_impact(sku, decision.delta_pct, context.elasticity));

    debug!(
        event_name = "optimizer.decision.resolved",
        sku = %sku.sku,
        trigger = price_recommendation.trigger.as_str(),
        action = decision.action.as_str(),
        delta_pct = decision.delta_pct,
        priority_level = decision.priority_level,
        blocked_by = decision.blocked_by.len(),
        "price decision resolved"
    );

    OptimizerOutput {
        sku: sku.sku.clone(),
        nm_id: sku.nm_id,
        timestamp: now,
        summary: get_decision_summary(sku, &mode, &decision),
        urgency: get_urgency(&decision),
        mode,
        diagnoses,
        price_recommendation,
        guards,
        decision,
        expected_impact,
    }
}

/// Runs SKUs strictly in input order; the family counter makes that order observable.
pub fn run_optimizer_batch<S: ConfigSource>(
    skus: &[SkuData],
    resolver: &ConfigResolver<S>,
    context: &OptimizerContext<'_>,
) -> Vec<OptimizerOutput> {
    let tables = resolver.tables(context.now);
    let mut family_changes =
        FamilyChangeCounter::seeded(context.history, &tables.families, context.now.date_naive());

    let mut outputs = Vec::with_capacity(skus.len());
    for sku in skus {
        let output = run_optimizer(sku, resolver, context, &family_changes);
        if is_actionable(&output.decision) {
            if let Some(family) = family_of(&tables, sku) {
                family_changes.record(&family.family_id);
            }
        }
        outputs.push(output);
    }

    let stats = get_action_stats(&outputs);
    info!(
        event_name = "optimizer.batch.completed",
        total = stats.total,
        up = stats.up,
        down = stats.down,
        hold = stats.hold,
        blocked = stats.blocked,
        "optimizer batch completed"
    );
    outputs
}
