use crate::domain::sku::{finite, SkuData};
use crate::optimizer::settings::OptimizerConfig;
use crate::optimizer::types::{Mode, ModeResult};

/// A posture and the predicate that selects it; the predicate returns the reason on a match.
struct ModeRule {
    mode: Mode,
    matches: fn(&SkuData, &OptimizerConfig) -> Option<String>,
}

/// Evaluated top to bottom, first match wins. GROWTH is the fallback.
const MODE_RULES: [ModeRule; 3] = [
    ModeRule { mode: Mode::Stop, matches: stop_reason },
    ModeRule { mode: Mode::Clear, matches: clear_reason },
    ModeRule { mode: Mode::Cow, matches: cow_reason },
];

pub fn classify_mode(sku: &SkuData, config: &OptimizerConfig) -> ModeResult {
    MODE_RULES
        .iter()
        .find_map(|rule| {
            (rule.matches)(sku, config).map(|reason| ModeResult::for_mode(rule.mode, reason))
        })
        .unwrap_or_else(|| {
            ModeResult::for_mode(Mode::Growth, "no protective posture applies; price follows triggers")
        })
}

fn stop_reason(sku: &SkuData, config: &OptimizerConfig) -> Option<String> {
    let cm0 = sku.cm0.and_then(finite);
    let margin = sku.margin.and_then(finite);

    if let Some(cm0) = cm0 {
        if cm0 <= 0.0 {
            return Some(format!("contribution margin {cm0:.2} is not positive"));
        }
    } else if let Some(margin) = margin {
        if margin <= 0.0 {
            return Some(format!("margin {:.1}% is not positive", margin * 100.0));
        }
    }

    let margin = margin?;
    (margin < config.min_margin_pct).then(|| {
        format!(
            "margin {:.1}% is below the {:.1}% floor",
            margin * 100.0,
            config.min_margin_pct * 100.0
        )
    })
}

fn clear_reason(sku: &SkuData, config: &OptimizerConfig) -> Option<String> {
    let cover_days = sku.stock_cover_days();
    (cover_days >= config.stock_overstock_days).then(|| {
        format!(
            "stock covers {cover_days:.0} days (overstock at {:.0})",
            config.stock_overstock_days
        )
    })
}

fn cow_reason(sku: &SkuData, config: &OptimizerConfig) -> Option<String> {
    let margin = sku.effective_margin()?;
    let cover_days = sku.stock_cover_days();
    (margin >= config.high_margin_threshold && cover_days >= config.stock_cow_min_days).then(|| {
        format!(
            "margin {:.1}% with {cover_days:.0} days of stock; hold price and scale ads",
            margin * 100.0
        )
    })
}
