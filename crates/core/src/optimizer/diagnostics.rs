//! Six independent checks over one SKU's funnel, each producing zero or more findings.
//!
//! Block order is fixed. Data sufficiency runs first and, when it fails, is the only
//! finding returned.

use crate::domain::sku::{finite, SkuData};
use crate::optimizer::settings::OptimizerConfig;
use crate::optimizer::types::{ActionHint, DiagnosisCode, DiagnosisResult, DiagnosticBlock};

type BlockCheck = fn(&SkuData, &OptimizerConfig) -> Vec<DiagnosisResult>;

const FOLLOW_UP_BLOCKS: [(DiagnosticBlock, BlockCheck); 5] = [
    (DiagnosticBlock::Traffic, check_traffic),
    (DiagnosticBlock::Creative, check_creative),
    (DiagnosticBlock::Conversion, check_conversion),
    (DiagnosticBlock::Price, check_price),
    (DiagnosticBlock::Rank, check_rank),
];

pub fn run_diagnostics(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    if let Some(insufficient) = check_data_sufficiency(sku, config) {
        return vec![insufficient];
    }

    FOLLOW_UP_BLOCKS.iter().flat_map(|(_, check)| check(sku, config)).collect()
}

/// True when the funnel has too few clicks or orders to justify a price decision.
pub fn has_insufficient_data(sku: &SkuData, config: &OptimizerConfig) -> bool {
    sku.clicks < config.min_clicks_for_decision || sku.orders < config.min_orders_for_decision
}

fn check_data_sufficiency(sku: &SkuData, config: &OptimizerConfig) -> Option<DiagnosisResult> {
    if !has_insufficient_data(sku, config) {
        return None;
    }

    Some(
        DiagnosisResult::new(
            DiagnosticBlock::Data,
            DiagnosisCode::InsufficientData,
            0.1,
            ActionHint::Hold,
            format!(
                "not enough data: {} clicks (min {}), {} orders (min {})",
                sku.clicks,
                config.min_clicks_for_decision,
                sku.orders,
                config.min_orders_for_decision
            ),
        )
        .with_metric("clicks", sku.clicks as f64)
        .with_metric("orders", sku.orders as f64),
    )
}

fn check_traffic(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    let mut findings = Vec::new();
    let Some(ad_spend) = finite(sku.ad_spend).filter(|spend| *spend > 0.0) else {
        return findings;
    };

    if sku.clicks > config.min_clicks_for_decision {
        let click_to_order_pct = sku.orders as f64 / sku.clicks as f64 * 100.0;
        if click_to_order_pct < config.non_target_cr_pct {
            findings.push(
                DiagnosisResult::new(
                    DiagnosticBlock::Traffic,
                    DiagnosisCode::TrafficNonTargetSuspected,
                    0.6,
                    ActionHint::AdsDown,
                    format!(
                        "paid traffic converts {click_to_order_pct:.2}% of clicks into orders \
                         (below {:.2}%)",
                        config.non_target_cr_pct
                    ),
                )
                .with_metric("click_to_order_pct", click_to_order_pct)
                .with_metric("ad_spend", ad_spend),
            );
        }
    }

    if let (Some(cpo), Some(cm0)) = (sku.cpo.and_then(finite), sku.cm0.and_then(finite)) {
        if cpo > cm0 {
            findings.push(
                DiagnosisResult::new(
                    DiagnosticBlock::Traffic,
                    DiagnosisCode::TrafficQualityLow,
                    0.75,
                    ActionHint::AdsDown,
                    format!("cost per order {cpo:.2} exceeds contribution margin {cm0:.2}"),
                )
                .with_metric("cpo", cpo)
                .with_metric("cm0", cm0),
            );
        }
    }

    findings
}

fn check_creative(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    let mut findings = Vec::new();
    let Some(ctr) = finite(sku.ctr) else {
        return findings;
    };
    if sku.impressions < config.min_impressions_for_creative {
        return findings;
    }

    let benchmark = config.ctr_benchmark;
    if ctr < 0.7 * benchmark {
        findings.push(
            DiagnosisResult::new(
                DiagnosticBlock::Creative,
                DiagnosisCode::CtrBelowBenchmark,
                0.7,
                ActionHint::FixCreative,
                format!("CTR {ctr:.2}% is below 70% of the {benchmark:.2}% benchmark"),
            )
            .with_metric("ctr", ctr)
            .with_metric("ctr_benchmark", benchmark),
        );
    }

    if sku.impressions > config.creative_mismatch_impressions && ctr < 0.5 * benchmark {
        findings.push(
            DiagnosisResult::new(
                DiagnosticBlock::Creative,
                DiagnosisCode::CreativeMismatchSuspected,
                0.8,
                ActionHint::FixCreative,
                format!(
                    "CTR {ctr:.2}% over {} impressions is under half the benchmark",
                    sku.impressions
                ),
            )
            .with_metric("ctr", ctr)
            .with_metric("impressions", sku.impressions as f64),
        );
    }

    findings
}

fn check_conversion(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    let mut findings = Vec::new();
    let (Some(ctr), Some(cr_cart), Some(cr_order)) =
        (finite(sku.ctr), finite(sku.cr_cart), finite(sku.cr_order))
    else {
        return findings;
    };

    if ctr >= config.ctr_benchmark && cr_cart < config.cr_cart_low && sku.clicks > 50 {
        findings.push(
            DiagnosisResult::new(
                DiagnosticBlock::Conversion,
                DiagnosisCode::CardConversionWeak,
                0.7,
                ActionHint::PriceDown,
                format!(
                    "traffic is healthy but only {cr_cart:.2}% of clicks add to cart \
                     (low mark {:.2}%)",
                    config.cr_cart_low
                ),
            )
            .with_metric("cr_cart", cr_cart)
            .with_metric("clicks", sku.clicks as f64),
        );
    }

    if cr_cart >= config.cr_cart_low && cr_order < config.cr_order_low && sku.cart_adds > 20 {
        findings.push(
            DiagnosisResult::new(
                DiagnosticBlock::Conversion,
                DiagnosisCode::CheckoutConversionWeak,
                0.6,
                ActionHint::Hold,
                format!(
                    "carts convert to orders at {cr_order:.2}% (low mark {:.2}%); \
                     not a pricing problem",
                    config.cr_order_low
                ),
            )
            .with_metric("cr_order", cr_order)
            .with_metric("cart_adds", sku.cart_adds as f64),
        );
    }

    findings
}

fn check_price(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    let mut findings = Vec::new();
    let ctr = finite(sku.ctr);
    let cr_order = finite(sku.cr_order);

    if let (Some(ctr), Some(cr_order)) = (ctr, cr_order) {
        if ctr >= config.ctr_benchmark && cr_order < config.cr_order_low {
            let competitor_gap = competitor_gap(sku);
            let confidence = match competitor_gap {
                Some(gap) if gap > config.overpriced_competitor_gap => 0.85,
                _ => 0.7,
            };
            let mut finding = DiagnosisResult::new(
                DiagnosticBlock::Price,
                DiagnosisCode::Overpriced,
                confidence,
                ActionHint::PriceDown,
                format!(
                    "shoppers click (CTR {ctr:.2}%) but do not buy (CR {cr_order:.2}% < {:.2}%)",
                    config.cr_order_low
                ),
            )
            .with_metric("ctr", ctr)
            .with_metric("cr_order", cr_order);
            if let Some(gap) = competitor_gap {
                finding = finding.with_metric("competitor_gap", gap);
            }
            findings.push(finding);
        } else if ctr >= config.ctr_benchmark && cr_order >= config.cr_order_low {
            findings.push(
                DiagnosisResult::new(
                    DiagnosticBlock::Price,
                    DiagnosisCode::PriceCompetitive,
                    0.6,
                    ActionHint::Hold,
                    "CTR and conversion are at or above benchmark",
                )
                .with_metric("ctr", ctr)
                .with_metric("cr_order", cr_order),
            );
        }
    }

    let cover_days = sku.stock_cover_days();
    let velocity = finite(sku.orders_per_day).unwrap_or(0.0);
    if cover_days <= config.stock_critical_days && velocity > 0.5 {
        findings.push(
            DiagnosisResult::new(
                DiagnosticBlock::Price,
                DiagnosisCode::Underpriced,
                0.9,
                ActionHint::PriceUp,
                format!(
                    "stock covers {cover_days:.1} days at {velocity:.1} orders/day \
                     (critical at {:.0})",
                    config.stock_critical_days
                ),
            )
            .with_metric("stock_cover_days", cover_days)
            .with_metric("orders_per_day", velocity),
        );
    }

    findings
}

/// Relative premium of the current price over the cheapest competitor.
fn competitor_gap(sku: &SkuData) -> Option<f64> {
    let competitor_min = sku.competitor_price_min.and_then(finite).filter(|min| *min > 0.0)?;
    let price = finite(sku.current_price)?;
    Some(price / competitor_min - 1.0)
}

fn check_rank(sku: &SkuData, config: &OptimizerConfig) -> Vec<DiagnosisResult> {
    let trend = sku.effective_order_trend();
    let Some(trend) = finite(trend) else {
        return Vec::new();
    };

    if trend < config.rank_drop_critical {
        return vec![DiagnosisResult::new(
            DiagnosticBlock::Rank,
            DiagnosisCode::RankDropCritical,
            0.9,
            ActionHint::Hold,
            format!(
                "order trend {trend:.2} is below the critical ratio {:.2}; do not raise price",
                config.rank_drop_critical
            ),
        )
        .with_metric("order_trend", trend)];
    }

    let impressions_drop_limit = -(config.sales_drop_warning * 100.0);
    let impressions_fell = sku
        .impressions_trend_14d
        .and_then(finite)
        .filter(|change_pct| *change_pct < impressions_drop_limit);

    if trend < config.rank_drop_warning || impressions_fell.is_some() {
        let mut finding = DiagnosisResult::new(
            DiagnosticBlock::Rank,
            DiagnosisCode::RankDropWarning,
            0.7,
            ActionHint::AdsUp,
            match impressions_fell {
                Some(change_pct) if trend >= config.rank_drop_warning => {
                    format!("impressions fell {:.1}% over 14 days", -change_pct)
                }
                _ => format!(
                    "order trend {trend:.2} is below the warning ratio {:.2}",
                    config.rank_drop_warning
                ),
            },
        )
        .with_metric("order_trend", trend);
        if let Some(change_pct) = impressions_fell {
            finding = finding.with_metric("impressions_trend_14d", change_pct);
        }
        return vec![finding];
    }

    Vec::new()
}

/// Highest-priority finding: block order DATA, RANK, PRICE, CONVERSION, TRAFFIC, CREATIVE,
/// then descending confidence.
pub fn get_most_critical_diagnosis(diagnoses: &[DiagnosisResult]) -> Option<&DiagnosisResult> {
    diagnoses.iter().min_by(|left, right| {
        left.block
            .criticality_rank()
            .cmp(&right.block.criticality_rank())
            .then_with(|| right.confidence.total_cmp(&left.confidence))
    })
}

pub fn has_action_hint(diagnoses: &[DiagnosisResult], hint: ActionHint) -> bool {
    diagnoses.iter().any(|diagnosis| diagnosis.action_hint == hint)
}

pub fn get_diagnoses_by_action(
    diagnoses: &[DiagnosisResult],
    hint: ActionHint,
) -> Vec<&DiagnosisResult> {
    diagnoses.iter().filter(|diagnosis| diagnosis.action_hint == hint).collect()
}
