//! Optimizer thresholds and the layered resolver that serves them.
//!
//! Effective config for a SKU is built as `defaults < global < category < sku_override`,
//! each layer overriding only the keys it defines. Reference tables (gold SKUs, manual
//! locks, families) are loaded alongside and cached for a fixed TTL.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{interpolate_env_vars, ConfigError, OptimizerSettings};
use crate::domain::reference::{FamilyDefinition, ManualLock};

pub const OPTIMIZER_FILE: &str = "optimizer.toml";
pub const GOLD_SKUS_FILE: &str = "gold_skus.toml";
pub const MANUAL_LOCKS_FILE: &str = "manual_locks.toml";
pub const FAMILIES_FILE: &str = "families.toml";

macro_rules! optimizer_config {
    ($($(#[$meta:meta])* $field:ident: $ty:ty = $default:expr,)*) => {
        /// Fully-populated thresholds for one SKU.
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct OptimizerConfig {
            $($(#[$meta])* pub $field: $ty,)*
        }

        impl Default for OptimizerConfig {
            fn default() -> Self {
                Self { $($field: $default,)* }
            }
        }

        /// One config layer; `None` keys inherit from the layer below.
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct OptimizerConfigPatch {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl OptimizerConfig {
            pub fn apply_patch(&mut self, patch: &OptimizerConfigPatch) {
                $(
                    if let Some(value) = patch.$field {
                        self.$field = value;
                    }
                )*
            }
        }

        impl OptimizerConfigPatch {
            pub fn defines(&self, key: &str) -> bool {
                match key {
                    $(stringify!($field) => self.$field.is_some(),)*
                    _ => false,
                }
            }
        }

        pub const OPTIMIZER_CONFIG_KEYS: &[&str] = &[$(stringify!($field),)*];
    };
}

optimizer_config! {
    cooldown_days: f64 = 3.0,
    gold_cooldown_days: f64 = 7.0,
    /// Fraction of price (0.10 = 10%).
    min_margin_pct: f64 = 0.10,
    high_margin_threshold: f64 = 0.30,
    max_price_step_pct: f64 = 0.10,
    max_price_step_pct_gold: f64 = 0.03,
    price_step_low_stock: f64 = 0.05,
    price_step_clear: f64 = 0.07,
    price_step_overpriced: f64 = 0.05,
    stock_critical_days: f64 = 10.0,
    stock_warning_days: f64 = 20.0,
    stock_overstock_days: f64 = 90.0,
    stock_cow_min_days: f64 = 30.0,
    /// Percent, same scale as `SkuData::ctr`.
    ctr_benchmark: f64 = 1.5,
    cr_cart_low: f64 = 5.0,
    cr_order_low: f64 = 1.5,
    cr_order_high: f64 = 4.0,
    /// Order-trend ratios (1.0 = flat).
    rank_drop_critical: f64 = 0.5,
    rank_drop_warning: f64 = 0.8,
    sales_drop_warning: f64 = 0.2,
    spend_spike_multiplier: f64 = 1.5,
    spend_leak_min_spend: f64 = 1000.0,
    family_max_changes: u32 = 1,
    min_clicks_for_decision: u64 = 30,
    min_orders_for_decision: u64 = 5,
    min_impressions_for_creative: u64 = 100,
    creative_mismatch_impressions: u64 = 500,
    /// Orders per click, percent.
    non_target_cr_pct: f64 = 0.5,
    overpriced_competitor_gap: f64 = 0.10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayer {
    Default,
    Global,
    Category,
    SkuOverride,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigTables {
    pub global: OptimizerConfigPatch,
    /// Keyed by lowercased category name.
    pub categories: HashMap<String, OptimizerConfigPatch>,
    pub sku_overrides: HashMap<String, OptimizerConfigPatch>,
    pub gold_skus: HashSet<String>,
    pub manual_locks: Vec<ManualLock>,
    pub families: Vec<FamilyDefinition>,
}

impl ConfigTables {
    pub fn with_category(mut self, category: &str, patch: OptimizerConfigPatch) -> Self {
        self.categories.insert(category.to_lowercase(), patch);
        self
    }

    pub fn resolve(&self, sku: &str, category: &str) -> OptimizerConfig {
        let mut config = OptimizerConfig::default();
        for (_, patch) in self.layers(sku, category) {
            config.apply_patch(patch);
        }
        config
    }

    /// Topmost layer that defines `key` for this SKU.
    pub fn source_of(&self, sku: &str, category: &str, key: &str) -> ConfigLayer {
        self.layers(sku, category)
            .into_iter()
            .rev()
            .find(|(_, patch)| patch.defines(key))
            .map(|(layer, _)| layer)
            .unwrap_or(ConfigLayer::Default)
    }

    pub fn family_for_sku(&self, sku: &str) -> Option<&FamilyDefinition> {
        self.families.iter().find(|family| family.contains(sku))
    }

    pub fn family_by_id(&self, family_id: &str) -> Option<&FamilyDefinition> {
        self.families.iter().find(|family| family.family_id == family_id)
    }

    fn layers(&self, sku: &str, category: &str) -> Vec<(ConfigLayer, &OptimizerConfigPatch)> {
        let mut layers = vec![(ConfigLayer::Global, &self.global)];
        if let Some(patch) = self.categories.get(&category.to_lowercase()) {
            layers.push((ConfigLayer::Category, patch));
        }
        if let Some(patch) = self.sku_overrides.get(sku) {
            layers.push((ConfigLayer::SkuOverride, patch));
        }
        layers
    }
}

pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ConfigTables, ConfigError>;
}

/// Tables held in memory, for embedding and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticConfigSource {
    tables: ConfigTables,
}

impl StaticConfigSource {
    pub fn new(tables: ConfigTables) -> Self {
        Self { tables }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<ConfigTables, ConfigError> {
        Ok(self.tables.clone())
    }
}

/// Reads the TOML table files from one directory. Absent files are empty layers.
#[derive(Clone, Debug)]
pub struct DirectoryConfigSource {
    dir: PathBuf,
}

impl DirectoryConfigSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parses each table file on its own so a broken file can be named.
    pub fn probe(&self) -> Vec<(&'static str, Result<(), ConfigError>)> {
        vec![
            (OPTIMIZER_FILE, read_table::<OptimizerFile>(&self.dir.join(OPTIMIZER_FILE)).map(drop)),
            (GOLD_SKUS_FILE, read_table::<GoldSkuFile>(&self.dir.join(GOLD_SKUS_FILE)).map(drop)),
            (
                MANUAL_LOCKS_FILE,
                read_table::<ManualLockFile>(&self.dir.join(MANUAL_LOCKS_FILE)).map(drop),
            ),
            (FAMILIES_FILE, read_table::<FamilyFile>(&self.dir.join(FAMILIES_FILE)).map(drop)),
        ]
    }
}

impl ConfigSource for DirectoryConfigSource {
    fn load(&self) -> Result<ConfigTables, ConfigError> {
        let optimizer: OptimizerFile = read_table(&self.dir.join(OPTIMIZER_FILE))?;
        let gold: GoldSkuFile = read_table(&self.dir.join(GOLD_SKUS_FILE))?;
        let locks: ManualLockFile = read_table(&self.dir.join(MANUAL_LOCKS_FILE))?;
        let families: FamilyFile = read_table(&self.dir.join(FAMILIES_FILE))?;

        Ok(ConfigTables {
            global: optimizer.global,
            categories: optimizer
                .category
                .into_iter()
                .map(|(name, patch)| (name.to_lowercase(), patch))
                .collect(),
            sku_overrides: optimizer.sku_override,
            gold_skus: gold.skus.into_iter().collect(),
            manual_locks: locks.locks,
            families: families.families,
        })
    }
}

pub(crate) fn read_table<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<T>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OptimizerFile {
    #[serde(default)]
    global: OptimizerConfigPatch,
    #[serde(default)]
    category: HashMap<String, OptimizerConfigPatch>,
    #[serde(default)]
    sku_override: HashMap<String, OptimizerConfigPatch>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GoldSkuFile {
    #[serde(default)]
    skus: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ManualLockFile {
    #[serde(default)]
    locks: Vec<ManualLock>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FamilyFile {
    #[serde(default)]
    families: Vec<FamilyDefinition>,
}

struct ConfigCache {
    tables: Arc<ConfigTables>,
    loaded_at: DateTime<Utc>,
    resolved: HashMap<(String, String), OptimizerConfig>,
}

/// Serves effective configs and reference lookups from a TTL cache over a [`ConfigSource`].
///
/// A load failure never propagates: it is logged and the hardcoded defaults are cached
/// until the next refresh.
pub struct ConfigResolver<S> {
    source: S,
    ttl: Duration,
    cache: Mutex<Option<ConfigCache>>,
}

impl<S: ConfigSource> ConfigResolver<S> {
    pub const DEFAULT_TTL_SECS: i64 = 300;

    pub fn new(source: S, ttl: Duration) -> Self {
        Self { source, ttl, cache: Mutex::new(None) }
    }

    pub fn with_default_ttl(source: S) -> Self {
        Self::new(source, Duration::seconds(Self::DEFAULT_TTL_SECS))
    }

    pub fn from_settings(source: S, settings: &OptimizerSettings) -> Self {
        let secs = i64::try_from(settings.cache_ttl_secs).unwrap_or(Self::DEFAULT_TTL_SECS);
        Self::new(source, Duration::seconds(secs))
    }

    pub fn get_config(&self, sku: &str, category: &str, now: DateTime<Utc>) -> OptimizerConfig {
        let mut slot = self.lock_cache();
        let cache = self.fresh_cache(&mut slot, now);
        let key = (sku.to_string(), category.to_lowercase());
        if let Some(config) = cache.resolved.get(&key) {
            return config.clone();
        }

        let config = cache.tables.resolve(sku, category);
        cache.resolved.insert(key, config.clone());
        config
    }

    pub fn tables(&self, now: DateTime<Utc>) -> Arc<ConfigTables> {
        let mut slot = self.lock_cache();
        Arc::clone(&self.fresh_cache(&mut slot, now).tables)
    }

    pub fn is_gold_sku(&self, sku: &str, now: DateTime<Utc>) -> bool {
        self.tables(now).gold_skus.contains(sku)
    }

    pub fn is_manual_locked(&self, sku: &str, now: DateTime<Utc>) -> bool {
        self.tables(now).manual_locks.iter().any(|lock| lock.sku == sku && lock.is_active(now))
    }

    pub fn family_for_sku(&self, sku: &str, now: DateTime<Utc>) -> Option<FamilyDefinition> {
        self.tables(now).family_for_sku(sku).cloned()
    }

    pub fn family_by_id(&self, family_id: &str, now: DateTime<Utc>) -> Option<FamilyDefinition> {
        self.tables(now).family_by_id(family_id).cloned()
    }

    /// Drops the cache and loads the tables again immediately.
    pub fn reload(&self, now: DateTime<Utc>) {
        let mut slot = self.lock_cache();
        *slot = Some(self.load(now));
    }

    fn fresh_cache<'a>(
        &self,
        slot: &'a mut Option<ConfigCache>,
        now: DateTime<Utc>,
    ) -> &'a mut ConfigCache {
        let stale = slot
            .as_ref()
            .map_or(true, |cache| now < cache.loaded_at || now - cache.loaded_at >= self.ttl);
        if stale {
            *slot = None;
        }
        slot.get_or_insert_with(|| self.load(now))
    }

    fn load(&self, now: DateTime<Utc>) -> ConfigCache {
        let tables = match self.source.load() {
            Ok(tables) => {
                debug!(
                    event_name = "optimizer.config.loaded",
                    categories = tables.categories.len(),
                    sku_overrides = tables.sku_overrides.len(),
                    gold_skus = tables.gold_skus.len(),
                    manual_locks = tables.manual_locks.len(),
                    families = tables.families.len(),
                    "optimizer config tables loaded"
                );
                tables
            }
            Err(error) => {
                warn!(
                    event_name = "optimizer.config.fallback_defaults",
                    error = %error,
                    "optimizer config could not be loaded; using hardcoded defaults"
                );
                ConfigTables::default()
            }
        };

        ConfigCache { tables: Arc::new(tables), loaded_at: now, resolved: HashMap::new() }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<ConfigCache>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
