pub mod config;
pub mod domain;
pub mod errors;
pub mod optimizer;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::history::PriceChangeRecord;
pub use domain::reference::{FamilyDefinition, ManualLock};
pub use domain::sku::SkuData;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use optimizer::settings::{
    ConfigResolver, ConfigSource, ConfigTables, DirectoryConfigSource, OptimizerConfig,
    StaticConfigSource,
};
pub use optimizer::types::{
    FinalDecision, GuardResult, GuardType, Mode, OptimizerOutput, PriceAction,
    PriceRecommendation, Urgency,
};
pub use optimizer::{run_optimizer, run_optimizer_batch, FamilyChangeCounter, OptimizerContext};
