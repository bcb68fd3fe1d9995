use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::reference::FamilyDefinition;
use crate::domain::sku::SkuData;
use crate::optimizer::resolver::is_actionable;
use crate::optimizer::types::{OptimizerOutput, PriceAction, PriceTrigger};

/// A price change that was applied to the marketplace. The optimizer only reads these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeRecord {
    pub sku: String,
    pub timestamp: DateTime<Utc>,
    pub action: PriceAction,
    pub delta_pct: f64,
    pub trigger: PriceTrigger,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub applied_by: String,
}

impl PriceChangeRecord {
    /// Builds the history entry for an actionable decision; `None` when nothing would change.
    pub fn from_output(
        sku: &SkuData,
        output: &OptimizerOutput,
        applied_by: impl Into<String>,
    ) -> Option<Self> {
        if !is_actionable(&output.decision) {
            return None;
        }

        let old_price = money(sku.current_price)?;
        let new_price = money(sku.current_price * (1.0 + output.decision.delta_pct))?;

        Some(Self {
            sku: sku.sku.clone(),
            timestamp: output.timestamp,
            action: output.decision.action,
            delta_pct: output.decision.delta_pct,
            trigger: output.price_recommendation.trigger,
            old_price,
            new_price,
            applied_by: applied_by.into(),
        })
    }
}

fn money(value: f64) -> Option<Decimal> {
    Decimal::from_f64_retain(value).map(|amount| amount.round_dp(2))
}

pub fn last_change_for<'a>(
    history: &'a [PriceChangeRecord],
    sku: &str,
) -> Option<&'a PriceChangeRecord> {
    history.iter().filter(|record| record.sku == sku).max_by_key(|record| record.timestamp)
}

pub fn family_changes_on(
    history: &[PriceChangeRecord],
    family: &FamilyDefinition,
    date: NaiveDate,
) -> u32 {
    let count = history
        .iter()
        .filter(|record| record.action != PriceAction::Hold)
        .filter(|record| record.timestamp.date_naive() == date)
        .filter(|record| family.contains(&record.sku))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
