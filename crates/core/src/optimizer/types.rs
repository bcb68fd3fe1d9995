use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Stop,
    Clear,
    Cow,
    Growth,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Clear => "CLEAR",
            Self::Cow => "COW",
            Self::Growth => "GROWTH",
        }
    }

    pub fn ttl_days(&self) -> u32 {
        match self {
            Self::Stop => 14,
            Self::Clear => 5,
            Self::Cow | Self::Growth => 7,
        }
    }

    pub fn actions(&self) -> ModeActions {
        match self {
            Self::Stop => ModeActions { price: PriceAction::Up, ads: AdsAction::Pause },
            Self::Clear => ModeActions { price: PriceAction::Down, ads: AdsAction::On },
            Self::Cow => ModeActions { price: PriceAction::Hold, ads: AdsAction::Scale },
            Self::Growth => ModeActions { price: PriceAction::Hold, ads: AdsAction::On },
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceAction {
    Up,
    Down,
    Hold,
}

impl PriceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Hold => "HOLD",
        }
    }

    /// Sign applied to a step magnitude: +1 for UP, -1 for DOWN, 0 for HOLD.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
            Self::Hold => 0.0,
        }
    }
}

impl fmt::Display for PriceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdsAction {
    Pause,
    On,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardDirection {
    Up,
    Down,
    Both,
}

impl GuardDirection {
    pub fn covers(&self, action: PriceAction) -> bool {
        match (self, action) {
            (_, PriceAction::Hold) => false,
            (Self::Both, _) => true,
            (Self::Up, PriceAction::Up) | (Self::Down, PriceAction::Down) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticBlock {
    Data,
    Traffic,
    Creative,
    Conversion,
    Price,
    Rank,
}

impl DiagnosticBlock {
    /// Ordering used when picking the most critical finding; lower is more critical.
    pub fn criticality_rank(&self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Rank => 1,
            Self::Price => 2,
            Self::Conversion => 3,
            Self::Traffic => 4,
            Self::Creative => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosisCode {
    InsufficientData,
    TrafficNonTargetSuspected,
    TrafficQualityLow,
    CtrBelowBenchmark,
    CreativeMismatchSuspected,
    CardConversionWeak,
    CheckoutConversionWeak,
    Overpriced,
    Underpriced,
    PriceCompetitive,
    RankDropCritical,
    RankDropWarning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionHint {
    Hold,
    PriceUp,
    PriceDown,
    AdsUp,
    AdsDown,
    FixCreative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceTrigger {
    ModeStop,
    Clear,
    LowStock,
    Overpriced,
    ModeCow,
    #[serde(rename = "NONE")]
    NoTrigger,
}

impl PriceTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModeStop => "MODE_STOP",
            Self::Clear => "CLEAR",
            Self::LowStock => "LOW_STOCK",
            Self::Overpriced => "OVERPRICED",
            Self::ModeCow => "MODE_COW",
            Self::NoTrigger => "NONE",
        }
    }

    /// Triggers whose direction comes from the strategic mode rather than a metric signal.
    pub fn is_mode_driven(&self) -> bool {
        matches!(self, Self::ModeStop | Self::Clear | Self::ModeCow)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardType {
    ManualOverride,
    DataGuard,
    CooldownGuard,
    MinMarginGuard,
    GoldProtection,
    RankDropGuard,
    StockGuard,
    FamilyGuard,
    SpendLeakGuard,
}

impl GuardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualOverride => "MANUAL_OVERRIDE",
            Self::DataGuard => "DATA_GUARD",
            Self::CooldownGuard => "COOLDOWN_GUARD",
            Self::MinMarginGuard => "MIN_MARGIN_GUARD",
            Self::GoldProtection => "GOLD_PROTECTION",
            Self::RankDropGuard => "RANK_DROP_GUARD",
            Self::StockGuard => "STOCK_GUARD",
            Self::FamilyGuard => "FAMILY_GUARD",
            Self::SpendLeakGuard => "SPEND_LEAK_GUARD",
        }
    }

    /// Evaluation ordinal, 1 = evaluated first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::ManualOverride => 1,
            Self::DataGuard => 2,
            Self::CooldownGuard => 3,
            Self::MinMarginGuard => 4,
            Self::GoldProtection => 5,
            Self::RankDropGuard => 6,
            Self::StockGuard => 7,
            Self::FamilyGuard => 8,
            Self::SpendLeakGuard => 9,
        }
    }
}

impl fmt::Display for GuardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    Warning,
    Info,
    Success,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub block: DiagnosticBlock,
    pub code: DiagnosisCode,
    pub confidence: f64,
    pub action_hint: ActionHint,
    pub reason: String,
    pub metrics: BTreeMap<String, f64>,
}

impl DiagnosisResult {
    pub fn new(
        block: DiagnosticBlock,
        code: DiagnosisCode,
        confidence: f64,
        action_hint: ActionHint,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            block,
            code,
            confidence: confidence.clamp(0.0, 1.0),
            action_hint,
            reason: reason.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeActions {
    pub price: PriceAction,
    pub ads: AdsAction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeResult {
    pub mode: Mode,
    pub reason: String,
    pub ttl_days: u32,
    pub actions: ModeActions,
}

impl ModeResult {
    pub fn for_mode(mode: Mode, reason: impl Into<String>) -> Self {
        Self { mode, reason: reason.into(), ttl_days: mode.ttl_days(), actions: mode.actions() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceImpact {
    pub new_price: f64,
    pub orders_delta_pct: f64,
    pub expected_orders_per_day: f64,
    pub expected_profit_per_day: f64,
    pub profit_delta_per_day: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecommendation {
    pub action: PriceAction,
    /// Signed fraction of the current price: positive for UP, negative for DOWN.
    pub delta_pct: f64,
    pub trigger: PriceTrigger,
    pub ttl_days: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_impact: Option<PriceImpact>,
}

impl PriceRecommendation {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: PriceAction::Hold,
            delta_pct: 0.0,
            trigger: PriceTrigger::NoTrigger,
            ttl_days: 7,
            reason: reason.into(),
            expected_impact: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub guard: GuardType,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks_direction: Option<GuardDirection>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, f64>,
}

impl GuardResult {
    pub fn pass(guard: GuardType, reason: impl Into<String>) -> Self {
        Self {
            guard,
            blocked: false,
            blocks_direction: None,
            reason: reason.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn block(guard: GuardType, direction: GuardDirection, reason: impl Into<String>) -> Self {
        Self {
            guard,
            blocked: true,
            blocks_direction: Some(direction),
            reason: reason.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: f64) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn blocks(&self, action: PriceAction) -> bool {
        self.blocked && self.blocks_direction.is_some_and(|direction| direction.covers(action))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub action: PriceAction,
    pub delta_pct: f64,
    pub confidence: f64,
    pub priority_level: u8,
    pub applied_rules: Vec<String>,
    pub blocked_by: Vec<GuardType>,
    pub reason_chain: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOutput {
    pub sku: String,
    pub nm_id: u64,
    pub timestamp: DateTime<Utc>,
    pub mode: ModeResult,
    pub diagnoses: Vec<DiagnosisResult>,
    pub price_recommendation: PriceRecommendation,
    pub guards: Vec<GuardResult>,
    pub decision: FinalDecision,
    /// Impact at the decided step; `None` unless the decision is actionable.
    #[serde(default)]
    pub expected_impact: Option<PriceImpact>,
    pub summary: String,
    pub urgency: Urgency,
}
