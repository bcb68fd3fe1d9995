use chrono::{DateTime, TimeZone, Utc};
use pricewise_core::domain::reference::FamilyDefinition;
use pricewise_core::domain::sku::SkuData;
use pricewise_core::optimizer::diagnostics::run_diagnostics;
use pricewise_core::optimizer::guards::is_direction_blocked;
use pricewise_core::optimizer::mode::classify_mode;
use pricewise_core::optimizer::price::evaluate_price;
use pricewise_core::optimizer::resolver::resolve_conflicts;
use pricewise_core::optimizer::settings::{
    ConfigResolver, ConfigTables, OptimizerConfig, StaticConfigSource,
};
use pricewise_core::optimizer::types::{
    DiagnosisCode, GuardDirection, GuardResult, GuardType, Mode, PriceAction, PriceTrigger,
};
use pricewise_core::optimizer::{
    run_optimizer, run_optimizer_batch, FamilyChangeCounter, OptimizerContext,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 20, 10, 0, 0).single().unwrap_or_default()
}

fn base(code: &str) -> SkuData {
    SkuData {
        current_price: 1000.0,
        cost_price: Some(700.0),
        margin: Some(0.3),
        stock_total: 150,
        orders_per_day: 5.0,
        impressions: 20_000,
        clicks: 400,
        ctr: 2.0,
        cart_adds: 60,
        cr_cart: 15.0,
        orders: 40,
        cr_order: 2.5,
        ..SkuData::new(code, 42, "garden")
    }
}

/// A spread of SKUs hitting every mode and every price trigger.
fn fixture_grid() -> Vec<SkuData> {
    let mut grid = Vec::new();
    for (index, stock_total) in [0_u64, 20, 150, 600, 5000].into_iter().enumerate() {
        for margin in [-0.05, 0.05, 0.2, 0.45] {
            for cr_order in [0.8, 2.5, 6.0] {
                grid.push(SkuData {
                    stock_total,
                    margin: Some(margin),
                    cm0: Some(1000.0 * margin),
                    cost_price: Some(1000.0 * (1.0 - margin)),
                    cr_order,
                    competitor_price_min: Some(850.0),
                    orders_trend_14d: Some(if index % 2 == 0 { 1.1 } else { 0.4 }),
                    ..base(&format!("GRID-{stock_total}-{margin}-{cr_order}"))
                });
            }
        }
    }
    grid
}

fn guard_sets() -> Vec<Vec<GuardResult>> {
    vec![
        vec![],
        vec![GuardResult::block(GuardType::RankDropGuard, GuardDirection::Up, "rank")],
        vec![GuardResult::block(GuardType::StockGuard, GuardDirection::Down, "stock")],
        vec![GuardResult::block(GuardType::MinMarginGuard, GuardDirection::Down, "margin")],
        vec![GuardResult::block(GuardType::GoldProtection, GuardDirection::Both, "gold")],
        vec![GuardResult::block(GuardType::SpendLeakGuard, GuardDirection::Both, "leak")],
        vec![GuardResult::block(GuardType::FamilyGuard, GuardDirection::Both, "family")],
        vec![GuardResult::block(GuardType::CooldownGuard, GuardDirection::Both, "cooldown")],
        vec![
            GuardResult::block(GuardType::RankDropGuard, GuardDirection::Up, "rank"),
            GuardResult::pass(GuardType::StockGuard, "ok"),
        ],
    ]
}

#[test]
fn empty_funnel_always_holds() -> Result<(), String> {
    let config = OptimizerConfig::default();
    let resolver = ConfigResolver::with_default_ttl(StaticConfigSource::default());
    for mut sku in fixture_grid() {
        sku.clicks = 0;
        sku.orders = 0;

        let diagnoses = run_diagnostics(&sku, &config);
        if diagnoses.len() != 1 || diagnoses[0].code != DiagnosisCode::InsufficientData {
            return Err(format!("{}: expected a lone INSUFFICIENT_DATA finding", sku.sku));
        }

        let output = run_optimizer(
            &sku,
            &resolver,
            &OptimizerContext::new(now()),
            &FamilyChangeCounter::default(),
        );
        if output.decision.action != PriceAction::Hold {
            return Err(format!("{}: empty funnel produced {}", sku.sku, output.decision.action));
        }
    }
    Ok(())
}

#[test]
fn non_positive_cm0_always_classifies_stop() -> Result<(), String> {
    let config = OptimizerConfig::default();
    for mut sku in fixture_grid() {
        sku.cm0 = Some(0.0);
        let mode = classify_mode(&sku, &config).mode;
        if mode != Mode::Stop {
            return Err(format!("{}: cm0 <= 0 classified as {mode}", sku.sku));
        }
    }
    Ok(())
}

#[test]
fn gold_decisions_never_exceed_gold_step() -> Result<(), String> {
    let config = OptimizerConfig::default();
    for sku in fixture_grid() {
        let diagnoses = run_diagnostics(&sku, &config);
        let mode = classify_mode(&sku, &config);
        let recommendation = evaluate_price(&sku, &mode, &diagnoses, &config, true);
        for guards in guard_sets() {
            let decision = resolve_conflicts(
                &sku,
                &mode,
                &recommendation,
                &diagnoses,
                &guards,
                &config,
                true,
            );
            if decision.delta_pct.abs() > config.max_price_step_pct_gold + 1e-12 {
                return Err(format!("{}: gold step {} too large", sku.sku, decision.delta_pct));
            }
        }
    }
    Ok(())
}

#[test]
fn blocked_directions_are_never_chosen() -> Result<(), String> {
    let config = OptimizerConfig::default();
    for sku in fixture_grid() {
        let diagnoses = run_diagnostics(&sku, &config);
        let mode = classify_mode(&sku, &config);
        for gold in [false, true] {
            let recommendation = evaluate_price(&sku, &mode, &diagnoses, &config, gold);
            for guards in guard_sets() {
                let decision = resolve_conflicts(
                    &sku,
                    &mode,
                    &recommendation,
                    &diagnoses,
                    &guards,
                    &config,
                    gold,
                );
                for direction in [PriceAction::Up, PriceAction::Down] {
                    if is_direction_blocked(&guards, direction) && decision.action == direction {
                        return Err(format!(
                            "{}: chose blocked direction {direction} with {:?}",
                            sku.sku, guards
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn resolve_conflicts_is_idempotent() -> Result<(), String> {
    let config = OptimizerConfig::default();
    for sku in fixture_grid() {
        let diagnoses = run_diagnostics(&sku, &config);
        let mode = classify_mode(&sku, &config);
        let recommendation = evaluate_price(&sku, &mode, &diagnoses, &config, false);
        for guards in guard_sets() {
            let first = resolve_conflicts(
                &sku,
                &mode,
                &recommendation,
                &diagnoses,
                &guards,
                &config,
                false,
            );
            let second = resolve_conflicts(
                &sku,
                &mode,
                &recommendation,
                &diagnoses,
                &guards,
                &config,
                false,
            );
            if first != second {
                return Err(format!("{}: decision changed between identical calls", sku.sku));
            }
        }
    }
    Ok(())
}

#[test]
fn family_cap_holds_second_actionable_member() -> Result<(), String> {
    let low_stock = |code: &str| SkuData { stock_total: 5, margin: Some(0.2), ..base(code) };
    let tables = ConfigTables {
        families: vec![FamilyDefinition {
            family_id: "hoses".to_string(),
            name: None,
            skus: vec!["HOSE-10".to_string(), "HOSE-20".to_string()],
            price_ladder: Some(vec!["HOSE-10".to_string(), "HOSE-20".to_string()]),
        }],
        ..ConfigTables::default()
    };
    let resolver = ConfigResolver::with_default_ttl(StaticConfigSource::new(tables));

    let outputs = run_optimizer_batch(
        &[low_stock("HOSE-10"), low_stock("HOSE-20")],
        &resolver,
        &OptimizerContext::new(now()),
    );

    if outputs[0].decision.action == PriceAction::Hold {
        return Err("first family member should be actionable".to_string());
    }
    let second = &outputs[1].decision;
    if second.action != PriceAction::Hold || !second.blocked_by.contains(&GuardType::FamilyGuard) {
        return Err(format!("second member not capped: {second:?}"));
    }
    Ok(())
}

#[test]
fn empty_stock_with_sales_raises_by_low_stock_step() {
    let sku = SkuData {
        stock_total: 0,
        in_transit: 0,
        orders_per_day: 5.0,
        clicks: 50,
        orders: 15,
        margin: Some(0.2),
        cost_price: Some(800.0),
        ..base("EMPTY")
    };
    assert_eq!(sku.stock_cover_days(), 0.0);

    let resolver = ConfigResolver::with_default_ttl(StaticConfigSource::default());
    let output = run_optimizer(
        &sku,
        &resolver,
        &OptimizerContext::new(now()),
        &FamilyChangeCounter::default(),
    );

    assert_eq!(output.mode.mode, Mode::Growth);
    assert_eq!(output.price_recommendation.trigger, PriceTrigger::LowStock);
    assert_eq!(output.decision.action, PriceAction::Up);
    assert!((output.decision.delta_pct - 0.05).abs() < 1e-12);
    assert_eq!(output.decision.priority_level, 6);
}

#[test]
fn negative_margin_forces_stop_raise() {
    let sku = SkuData { margin: Some(-0.02), cost_price: Some(1020.0), ..base("LOSS") };
    let resolver = ConfigResolver::with_default_ttl(StaticConfigSource::default());
    let output = run_optimizer(
        &sku,
        &resolver,
        &OptimizerContext::new(now()),
        &FamilyChangeCounter::default(),
    );

    assert_eq!(output.mode.mode, Mode::Stop);
    assert_eq!(output.price_recommendation.trigger, PriceTrigger::ModeStop);
    assert_eq!(output.decision.action, PriceAction::Up);
    assert!((output.decision.delta_pct - 0.05).abs() < 1e-12);
    assert_eq!(output.decision.priority_level, 6);
}

#[test]
fn healthy_ctr_with_weak_conversion_cuts_price() {
    let sku = SkuData {
        ctr: 2.0,
        cr_order: 1.0,
        competitor_price_min: Some(900.0),
        current_price: 1000.0,
        ..base("PRICEY")
    };
    let config = OptimizerConfig::default();

    let diagnoses = run_diagnostics(&sku, &config);
    let overpriced = diagnoses.iter().find(|diagnosis| diagnosis.code == DiagnosisCode::Overpriced);
    assert!(overpriced.is_some_and(|diagnosis| (diagnosis.confidence - 0.85).abs() < 1e-12));

    let mode = classify_mode(&sku, &config);
    let recommendation = evaluate_price(&sku, &mode, &diagnoses, &config, false);
    assert_eq!(recommendation.trigger, PriceTrigger::Overpriced);
    assert_eq!(recommendation.action, PriceAction::Down);
    assert!((recommendation.delta_pct + config.price_step_overpriced).abs() < 1e-12);
}
