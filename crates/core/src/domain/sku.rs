use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::optimizer::types::PriceAction;

/// Cover value reported when a SKU has no usable sales velocity.
pub const STOCK_COVER_SENTINEL_DAYS: f64 = 999.0;

/// One SKU's metrics for a single optimizer run.
///
/// Scales: funnel rates (`ctr`, `cr_cart`, `cr_order`, `buyout_percent`, `drr`) are
/// percentages in 0..=100. `margin` is a fraction of the current price. `orders_trend_14d`
/// is a ratio against the prior window (1.0 = flat) while `impressions_trend_14d` and
/// `sales_trend` are percent changes (-25.0 = fell by a quarter).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkuData {
    pub sku: String,
    pub nm_id: u64,
    pub title: String,
    pub category: String,
    pub family_id: Option<String>,

    pub stock_total: u64,
    pub in_transit: u64,

    pub orders_per_day: f64,
    pub orders_last_7d: u64,
    pub orders_last_14d: u64,

    pub current_price: f64,
    pub cost_price: Option<f64>,
    pub margin: Option<f64>,
    pub cm0: Option<f64>,

    pub impressions: u64,
    pub clicks: u64,
    pub ctr: f64,
    pub cart_adds: u64,
    pub cr_cart: f64,
    pub orders: u64,
    pub cr_order: f64,
    pub buyout_percent: Option<f64>,

    pub ad_spend: f64,
    pub ad_orders: u64,
    pub cpo: Option<f64>,
    pub drr: Option<f64>,

    pub sales_trend: Option<f64>,
    pub impressions_trend_14d: Option<f64>,
    pub orders_trend_14d: Option<f64>,

    pub last_price_change: Option<DateTime<Utc>>,
    pub last_price_direction: Option<PriceAction>,

    pub competitor_price_min: Option<f64>,
    pub competitor_price_avg: Option<f64>,
    pub competitor_price_max: Option<f64>,
}

impl SkuData {
    pub fn new(sku: impl Into<String>, nm_id: u64, category: impl Into<String>) -> Self {
        Self { sku: sku.into(), nm_id, category: category.into(), ..Self::default() }
    }

    pub fn effective_stock(&self) -> u64 {
        self.stock_total.saturating_add(self.in_transit)
    }

    pub fn stock_cover_days(&self) -> f64 {
        let stock = self.effective_stock() as f64;
        match finite(self.orders_per_day) {
            Some(rate) if rate > 0.0 => stock / rate,
            _ => STOCK_COVER_SENTINEL_DAYS,
        }
    }

    /// Order-velocity ratio of the recent window to the prior one.
    ///
    /// Prefers the supplied 14-day trend, falls back to the 7d/14d daily-rate ratio and
    /// finally to 1.0 when there is no 14-day history.
    pub fn effective_order_trend(&self) -> f64 {
        if let Some(trend) = self.orders_trend_14d.and_then(finite) {
            return trend;
        }
        if self.orders_last_14d == 0 {
            return 1.0;
        }
        let recent = self.orders_last_7d as f64 / 7.0;
        let baseline = self.orders_last_14d as f64 / 14.0;
        recent / baseline
    }

    /// Contribution margin as a fraction of price, falling back to the reported margin.
    pub fn effective_margin(&self) -> Option<f64> {
        let price = finite(self.current_price).filter(|price| *price > 0.0);
        match (self.cm0.and_then(finite), price) {
            (Some(cm0), Some(price)) => Some(cm0 / price),
            _ => self.margin.and_then(finite),
        }
    }

    /// Unit cost from `cost_price`, else inferred from the current margin.
    pub fn unit_cost(&self) -> Option<f64> {
        if let Some(cost) = self.cost_price.and_then(finite) {
            return Some(cost);
        }
        let price = finite(self.current_price)?;
        self.margin.and_then(finite).map(|margin| price * (1.0 - margin))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::InvariantViolation("sku code cannot be empty".to_string()));
        }
        if !self.current_price.is_finite() || self.current_price < 0.0 {
            return Err(DomainError::InvariantViolation(format!(
                "sku `{}` has an invalid current_price {}",
                self.sku, self.current_price
            )));
        }
        Ok(())
    }
}

/// Returns the value when it is a usable number; NaN and infinities mean "skip this check".
pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
