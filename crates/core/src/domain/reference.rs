use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Related SKUs whose prices must not all move on the same day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyDefinition {
    pub family_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub skus: Vec<String>,
    /// Members ordered from cheapest to most expensive variant.
    #[serde(default)]
    pub price_ladder: Option<Vec<String>>,
}

impl FamilyDefinition {
    pub fn contains(&self, sku: &str) -> bool {
        self.skus.iter().any(|member| member == sku)
    }

    pub fn ladder_position(&self, sku: &str) -> Option<usize> {
        self.price_ladder.as_ref()?.iter().position(|member| member == sku)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualLock {
    pub sku: String,
    pub until: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub locked_by: Option<String>,
}

impl ManualLock {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}
