//! Safety guards run after the price proposal. Each guard may veto a direction; the
//! resolver decides what a veto means for the final decision.

use chrono::{DateTime, Utc};

use crate::domain::history::{last_change_for, PriceChangeRecord};
use crate::domain::reference::FamilyDefinition;
use crate::domain::sku::{finite, SkuData};
use crate::optimizer::diagnostics::has_insufficient_data;
use crate::optimizer::settings::OptimizerConfig;
use crate::optimizer::types::{
    GuardDirection, GuardResult, GuardType, PriceAction, PriceRecommendation,
};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Per-run facts the guards need beyond the SKU and its config.
#[derive(Clone, Debug)]
pub struct GuardOptions<'a> {
    pub now: DateTime<Utc>,
    pub is_gold: bool,
    pub manual_locked: bool,
    pub family: Option<&'a FamilyDefinition>,
    /// Actionable changes already made today within `family`.
    pub family_changes_today: u32,
    pub history: &'a [PriceChangeRecord],
}

impl<'a> GuardOptions<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            is_gold: false,
            manual_locked: false,
            family: None,
            family_changes_today: 0,
            history: &[],
        }
    }
}

struct GuardInput<'a> {
    sku: &'a SkuData,
    recommendation: &'a PriceRecommendation,
    config: &'a OptimizerConfig,
    options: &'a GuardOptions<'a>,
}

type GuardCheck = fn(&GuardInput<'_>) -> Option<GuardResult>;

/// Evaluation order. A check returning `None` did not examine the SKU.
const GUARD_BANK: [(GuardType, GuardCheck); 9] = [
    (GuardType::ManualOverride, manual_override),
    (GuardType::DataGuard, data_guard),
    (GuardType::CooldownGuard, cooldown_guard),
    (GuardType::MinMarginGuard, min_margin_guard),
    (GuardType::GoldProtection, gold_protection),
    (GuardType::RankDropGuard, rank_drop_guard),
    (GuardType::StockGuard, stock_guard),
    (GuardType::FamilyGuard, family_guard),
    (GuardType::SpendLeakGuard, spend_leak_guard),
];

pub fn run_safety_guards(
    sku: &SkuData,
    recommendation: &PriceRecommendation,
    config: &OptimizerConfig,
    options: &GuardOptions<'_>,
) -> Vec<GuardResult> {
    let input = GuardInput { sku, recommendation, config, options };
    GUARD_BANK.iter().filter_map(|(_, check)| check(&input)).collect()
}

/// True if any blocking guard vetoes `direction`, directly or through BOTH.
pub fn is_direction_blocked(guards: &[GuardResult], direction: PriceAction) -> bool {
    guards.iter().any(|guard| guard.blocks(direction))
}

pub fn get_guard_priority(guard: GuardType) -> u8 {
    guard.priority()
}

fn manual_override(input: &GuardInput<'_>) -> Option<GuardResult> {
    Some(if input.options.manual_locked {
        GuardResult::block(
            GuardType::ManualOverride,
            GuardDirection::Both,
            "price is manually locked",
        )
    } else {
        GuardResult::pass(GuardType::ManualOverride, "no active manual lock")
    })
}

fn data_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    let sku = input.sku;
    let config = input.config;
    let result = if has_insufficient_data(sku, config) {
        GuardResult::block(
            GuardType::DataGuard,
            GuardDirection::Both,
            format!(
                "insufficient data: {} clicks (min {}), {} orders (min {})",
                sku.clicks,
                config.min_clicks_for_decision,
                sku.orders,
                config.min_orders_for_decision
            ),
        )
    } else {
        GuardResult::pass(GuardType::DataGuard, "enough clicks and orders")
    };
    Some(
        result
            .with_detail("clicks", sku.clicks as f64)
            .with_detail("orders", sku.orders as f64),
    )
}

fn cooldown_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    let cooldown_days = if input.options.is_gold {
        input.config.gold_cooldown_days
    } else {
        input.config.cooldown_days
    };

    let from_history =
        last_change_for(input.options.history, &input.sku.sku).map(|record| record.timestamp);
    let Some(last_change) = input.sku.last_price_change.max(from_history) else {
        return Some(GuardResult::pass(GuardType::CooldownGuard, "no previous price change"));
    };

    let days_since = (input.options.now - last_change).num_seconds() as f64 / SECONDS_PER_DAY;
    let result = if days_since < cooldown_days {
        GuardResult::block(
            GuardType::CooldownGuard,
            GuardDirection::Both,
            format!("last change {days_since:.1} days ago; cooldown is {cooldown_days:.0} days"),
        )
    } else {
        GuardResult::pass(
            GuardType::CooldownGuard,
            format!("last change {days_since:.1} days ago"),
        )
    };
    Some(
        result
            .with_detail("days_since_change", days_since)
            .with_detail("cooldown_days", cooldown_days),
    )
}

fn min_margin_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    if input.recommendation.action != PriceAction::Down {
        return None;
    }

    let floor = input.config.min_margin_pct;
    let price = finite(input.sku.current_price).filter(|price| *price > 0.0);
    let (Some(price), Some(cost)) = (price, input.sku.unit_cost()) else {
        return Some(GuardResult::pass(
            GuardType::MinMarginGuard,
            "unit cost unknown; margin check skipped",
        ));
    };

    let current_margin = (price - cost) / price;
    let new_price = price * (1.0 + finite(input.recommendation.delta_pct).unwrap_or(0.0));
    let new_margin = if new_price > 0.0 { (new_price - cost) / new_price } else { f64::MIN };

    let result = if current_margin <= floor {
        GuardResult::block(
            GuardType::MinMarginGuard,
            GuardDirection::Down,
            format!(
                "margin {:.1}% is already at or below the {:.1}% floor",
                current_margin * 100.0,
                floor * 100.0
            ),
        )
    } else if new_margin < floor {
        GuardResult::block(
            GuardType::MinMarginGuard,
            GuardDirection::Down,
            format!(
                "cut would leave {:.1}% margin, below the {:.1}% floor",
                new_margin * 100.0,
                floor * 100.0
            ),
        )
    } else {
        GuardResult::pass(
            GuardType::MinMarginGuard,
            format!("margin after cut {:.1}%", new_margin * 100.0),
        )
    };
    Some(
        result
            .with_detail("current_margin", current_margin)
            .with_detail("new_margin", new_margin)
            .with_detail("min_margin_pct", floor),
    )
}

fn gold_protection(input: &GuardInput<'_>) -> Option<GuardResult> {
    if !input.options.is_gold {
        return None;
    }

    let step = finite(input.recommendation.delta_pct).unwrap_or(0.0).abs();
    let limit = input.config.max_price_step_pct_gold;
    let result = if step > limit {
        GuardResult::block(
            GuardType::GoldProtection,
            GuardDirection::Both,
            format!(
                "gold SKU: step {:.1}% exceeds the {:.1}% limit",
                step * 100.0,
                limit * 100.0
            ),
        )
    } else {
        GuardResult::pass(GuardType::GoldProtection, "gold SKU step within limit")
    };
    Some(result.with_detail("step", step).with_detail("limit", limit))
}

fn rank_drop_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    if input.recommendation.action != PriceAction::Up {
        return None;
    }

    let Some(trend) = finite(input.sku.effective_order_trend()) else {
        return Some(GuardResult::pass(GuardType::RankDropGuard, "order trend unavailable"));
    };
    let result = if trend < input.config.rank_drop_critical {
        GuardResult::block(
            GuardType::RankDropGuard,
            GuardDirection::Up,
            format!(
                "order trend {trend:.2} is below {:.2}; raising price would deepen the drop",
                input.config.rank_drop_critical
            ),
        )
    } else {
        GuardResult::pass(GuardType::RankDropGuard, format!("order trend {trend:.2}"))
    };
    Some(result.with_detail("order_trend", trend))
}

fn stock_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    if input.recommendation.action != PriceAction::Down {
        return None;
    }

    let cover_days = input.sku.stock_cover_days();
    let result = if cover_days < input.config.stock_critical_days {
        GuardResult::block(
            GuardType::StockGuard,
            GuardDirection::Down,
            format!(
                "only {cover_days:.1} days of stock; a cut would sell out (critical at {:.0})",
                input.config.stock_critical_days
            ),
        )
    } else {
        GuardResult::pass(GuardType::StockGuard, format!("{cover_days:.1} days of stock"))
    };
    Some(result.with_detail("stock_cover_days", cover_days))
}

fn family_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    let family = input.options.family?;
    if input.recommendation.action == PriceAction::Hold {
        return None;
    }

    let changes = input.options.family_changes_today;
    let limit = input.config.family_max_changes;
    let mut result = if changes >= limit {
        GuardResult::block(
            GuardType::FamilyGuard,
            GuardDirection::Both,
            format!(
                "family `{}` already changed {changes} time(s) today (limit {limit})",
                family.family_id
            ),
        )
    } else {
        GuardResult::pass(
            GuardType::FamilyGuard,
            format!("family `{}` has {changes} change(s) today", family.family_id),
        )
    };
    result = result
        .with_detail("changes_today", f64::from(changes))
        .with_detail("family_max_changes", f64::from(limit));
    if let Some(position) = family.ladder_position(&input.sku.sku) {
        result = result.with_detail("ladder_position", position as f64);
    }
    Some(result)
}

fn spend_leak_guard(input: &GuardInput<'_>) -> Option<GuardResult> {
    let sku = input.sku;
    let config = input.config;
    let ad_spend = finite(sku.ad_spend).unwrap_or(0.0);

    if ad_spend > config.spend_leak_min_spend && sku.ad_orders == 0 {
        return Some(
            GuardResult::block(
                GuardType::SpendLeakGuard,
                GuardDirection::Both,
                format!("ad spend {ad_spend:.0} produced no ad orders"),
            )
            .with_detail("ad_spend", ad_spend),
        );
    }

    let cpo = sku.cpo.and_then(finite);
    let cm0 = sku.cm0.and_then(finite);
    if let (Some(cpo), Some(cm0)) = (cpo, cm0) {
        let ceiling = cm0 * config.spend_spike_multiplier;
        if cpo > ceiling {
            return Some(
                GuardResult::pass(
                    GuardType::SpendLeakGuard,
                    format!("cost per order {cpo:.0} exceeds {ceiling:.0}; review ad bids"),
                )
                .with_detail("cpo", cpo)
                .with_detail("cpo_ceiling", ceiling),
            );
        }
    }

    Some(GuardResult::pass(GuardType::SpendLeakGuard, "ad spend healthy"))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{get_guard_priority, is_direction_blocked, run_safety_guards, GuardOptions};
    use crate::domain::history::PriceChangeRecord;
    use crate::domain::reference::FamilyDefinition;
    use crate::domain::sku::SkuData;
    use crate::optimizer::settings::OptimizerConfig;
    use crate::optimizer::types::{
        GuardDirection, GuardResult, GuardType, PriceAction, PriceRecommendation, PriceTrigger,
    };

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 15, 9, 0, 0).single().unwrap_or_default()
    }

    fn healthy() -> SkuData {
        SkuData {
            current_price: 1000.0,
            cost_price: Some(600.0),
            margin: Some(0.4),
            stock_total: 150,
            orders_per_day: 5.0,
            clicks: 800,
            orders: 40,
            ..SkuData::new("SKU-7", 7, "home")
        }
    }

    fn rec(action: PriceAction, delta_pct: f64) -> PriceRecommendation {
        PriceRecommendation {
            action,
            delta_pct,
            trigger: PriceTrigger::Overpriced,
            ttl_days: 7,
            reason: "test".to_string(),
            expected_impact: None,
        }
    }

    fn find(guards: &[GuardResult], guard: GuardType) -> Option<&GuardResult> {
        guards.iter().find(|result| result.guard == guard)
    }

    #[test]
    fn healthy_sku_passes_every_examined_guard() {
        let config = OptimizerConfig::default();
        let guards = run_safety_guards(
            &healthy(),
            &rec(PriceAction::Down, -0.05),
            &config,
            &GuardOptions::new(now()),
        );

        assert!(guards.iter().all(|guard| !guard.blocked));
        let order: Vec<GuardType> = guards.iter().map(|guard| guard.guard).collect();
        assert_eq!(
            order,
            vec![
                GuardType::ManualOverride,
                GuardType::DataGuard,
                GuardType::CooldownGuard,
                GuardType::MinMarginGuard,
                GuardType::StockGuard,
                GuardType::SpendLeakGuard,
            ]
        );
    }

    #[test]
    fn manual_lock_blocks_both_directions() {
        let options = GuardOptions { manual_locked: true, ..GuardOptions::new(now()) };
        let guards = run_safety_guards(
            &healthy(),
            &rec(PriceAction::Up, 0.05),
            &OptimizerConfig::default(),
            &options,
        );
        assert!(is_direction_blocked(&guards, PriceAction::Up));
        assert!(is_direction_blocked(&guards, PriceAction::Down));
        assert!(!is_direction_blocked(&guards, PriceAction::Hold));
    }

    #[test]
    fn cooldown_uses_most_recent_of_sku_and_history() {
        let sku = SkuData { last_price_change: Some(now() - Duration::days(10)), ..healthy() };
        let history = vec![PriceChangeRecord {
            sku: "SKU-7".to_string(),
            timestamp: now() - Duration::hours(36),
            action: PriceAction::Up,
            delta_pct: 0.05,
            trigger: PriceTrigger::LowStock,
            old_price: Decimal::new(95_000, 2),
            new_price: Decimal::new(100_000, 2),
            applied_by: "optimizer".to_string(),
        }];
        let options = GuardOptions { history: &history, ..GuardOptions::new(now()) };
        let guards =
            run_safety_guards(&sku, &rec(PriceAction::Up, 0.05), &OptimizerConfig::default(), &options);

        let cooldown = find(&guards, GuardType::CooldownGuard);
        assert!(cooldown.is_some_and(|guard| guard.blocked));
        assert_eq!(cooldown.and_then(|guard| guard.blocks_direction), Some(GuardDirection::Both));
    }

    #[test]
    fn gold_skus_use_longer_cooldown() {
        let sku = SkuData { last_price_change: Some(now() - Duration::days(5)), ..healthy() };
        let config = OptimizerConfig::default();
        let regular = run_safety_guards(
            &sku,
            &rec(PriceAction::Up, 0.03),
            &config,
            &GuardOptions::new(now()),
        );
        let gold = run_safety_guards(
            &sku,
            &rec(PriceAction::Up, 0.03),
            &config,
            &GuardOptions { is_gold: true, ..GuardOptions::new(now()) },
        );

        assert!(find(&regular, GuardType::CooldownGuard).is_some_and(|guard| !guard.blocked));
        assert!(find(&gold, GuardType::CooldownGuard).is_some_and(|guard| guard.blocked));
    }

    #[test]
    fn min_margin_blocks_cut_through_the_floor() {
        let sku = SkuData { cost_price: Some(880.0), ..healthy() };
        let guards = run_safety_guards(
            &sku,
            &rec(PriceAction::Down, -0.05),
            &OptimizerConfig::default(),
            &GuardOptions::new(now()),
        );
        let guard = find(&guards, GuardType::MinMarginGuard);
        assert!(guard.is_some_and(|guard| guard.blocks(PriceAction::Down)));
        assert!(!is_direction_blocked(&guards, PriceAction::Up));
    }

    #[test]
    fn min_margin_infers_cost_from_margin_and_skips_when_unknown() {
        let inferred = SkuData { cost_price: None, margin: Some(0.08), ..healthy() };
        let unknown = SkuData { cost_price: None, margin: None, ..healthy() };
        let config = OptimizerConfig::default();
        let options = GuardOptions::new(now());
        let down = rec(PriceAction::Down, -0.05);

        let guards = run_safety_guards(&inferred, &down, &config, &options);
        assert!(find(&guards, GuardType::MinMarginGuard).is_some_and(|guard| guard.blocked));

        let guards = run_safety_guards(&unknown, &down, &config, &options);
        assert!(find(&guards, GuardType::MinMarginGuard).is_some_and(|guard| !guard.blocked));
    }

    #[test]
    fn rank_drop_blocks_only_raises() {
        let sku = SkuData { orders_trend_14d: Some(0.3), ..healthy() };
        let config = OptimizerConfig::default();
        let options = GuardOptions::new(now());

        let up = run_safety_guards(&sku, &rec(PriceAction::Up, 0.05), &config, &options);
        assert!(find(&up, GuardType::RankDropGuard).is_some_and(|guard| guard.blocks(PriceAction::Up)));

        let down = run_safety_guards(&sku, &rec(PriceAction::Down, -0.05), &config, &options);
        assert!(find(&down, GuardType::RankDropGuard).is_none());
    }

    #[test]
    fn stock_guard_blocks_cut_when_cover_is_short() {
        let sku = SkuData { stock_total: 20, ..healthy() };
        let guards = run_safety_guards(
            &sku,
            &rec(PriceAction::Down, -0.05),
            &OptimizerConfig::default(),
            &GuardOptions::new(now()),
        );
        let stock = find(&guards, GuardType::StockGuard);
        assert!(stock.is_some_and(|guard| guard.blocks(PriceAction::Down)));
        assert_eq!(stock.and_then(|guard| guard.details.get("stock_cover_days").copied()), Some(4.0));
    }

    #[test]
    fn gold_protection_blocks_oversized_step() {
        let options = GuardOptions { is_gold: true, ..GuardOptions::new(now()) };
        let guards = run_safety_guards(
            &healthy(),
            &rec(PriceAction::Up, 0.05),
            &OptimizerConfig::default(),
            &options,
        );
        assert!(find(&guards, GuardType::GoldProtection).is_some_and(|guard| guard.blocked));
    }

    #[test]
    fn family_guard_caps_changes_per_day() {
        let family = FamilyDefinition {
            family_id: "mugs".to_string(),
            name: None,
            skus: vec!["SKU-6".to_string(), "SKU-7".to_string()],
            price_ladder: Some(vec!["SKU-6".to_string(), "SKU-7".to_string()]),
        };
        let config = OptimizerConfig::default();
        let fresh = GuardOptions { family: Some(&family), ..GuardOptions::new(now()) };
        let spent = GuardOptions { family_changes_today: 1, ..fresh.clone() };

        let guards = run_safety_guards(&healthy(), &rec(PriceAction::Up, 0.05), &config, &fresh);
        let guard = find(&guards, GuardType::FamilyGuard);
        assert!(guard.is_some_and(|guard| !guard.blocked));
        assert_eq!(guard.and_then(|guard| guard.details.get("ladder_position").copied()), Some(1.0));

        let guards = run_safety_guards(&healthy(), &rec(PriceAction::Up, 0.05), &config, &spent);
        assert!(find(&guards, GuardType::FamilyGuard).is_some_and(|guard| guard.blocked));

        let guards =
            run_safety_guards(&healthy(), &PriceRecommendation::hold("none"), &config, &spent);
        assert!(find(&guards, GuardType::FamilyGuard).is_none());
    }

    #[test]
    fn spend_leak_is_a_hard_stop_and_cpo_spike_is_informational() {
        let config = OptimizerConfig::default();
        let options = GuardOptions::new(now());
        let up = rec(PriceAction::Up, 0.05);

        let leaking = SkuData { ad_spend: 1500.0, ad_orders: 0, ..healthy() };
        let guards = run_safety_guards(&leaking, &up, &config, &options);
        assert!(find(&guards, GuardType::SpendLeakGuard).is_some_and(|guard| guard.blocked));

        let spiking =
            SkuData { ad_spend: 900.0, ad_orders: 3, cpo: Some(300.0), cm0: Some(150.0), ..healthy() };
        let guards = run_safety_guards(&spiking, &up, &config, &options);
        let guard = find(&guards, GuardType::SpendLeakGuard);
        assert!(guard.is_some_and(|guard| !guard.blocked));
        assert!(guard.is_some_and(|guard| guard.details.contains_key("cpo_ceiling")));
    }

    #[test]
    fn guard_priority_follows_evaluation_order() {
        assert_eq!(get_guard_priority(GuardType::ManualOverride), 1);
        assert_eq!(get_guard_priority(GuardType::FamilyGuard), 8);
        assert!(
            get_guard_priority(GuardType::CooldownGuard) < get_guard_priority(GuardType::StockGuard)
        );
    }
}
