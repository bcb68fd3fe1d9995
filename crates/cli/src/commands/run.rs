use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use pricewise_core::domain::history::PriceChangeRecord;
use pricewise_core::domain::sku::SkuData;
use pricewise_core::errors::ApplicationError;
use pricewise_core::optimizer::aggregate::{
    calculate_total_impact, get_action_stats, get_blocked_by_guard, get_top_priority_items,
    group_by_mode, ActionStats, TotalImpact,
};
use pricewise_core::optimizer::settings::{ConfigResolver, DirectoryConfigSource};
use pricewise_core::optimizer::types::{GuardType, Mode, OptimizerOutput, PriceAction, Urgency};
use pricewise_core::optimizer::{run_optimizer_batch, OptimizerContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{load_app_config, CommandResult};

pub const TOP_ITEMS_LIMIT: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct RunArgs {
    pub input: PathBuf,
    pub history: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    /// RFC 3339 timestamp; defaults to the current time.
    pub now: Option<String>,
    pub summary: bool,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    sku_count: usize,
    outputs: &'a [OptimizerOutput],
}

#[derive(Debug, Serialize)]
struct TopItem<'a> {
    sku: &'a str,
    action: PriceAction,
    delta_pct: f64,
    urgency: Urgency,
    summary: &'a str,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    action_stats: ActionStats,
    modes: BTreeMap<Mode, Vec<&'a str>>,
    blocked_by_guard: BTreeMap<GuardType, Vec<String>>,
    top_items: Vec<TopItem<'a>>,
    total_impact: TotalImpact,
}

pub fn run(args: RunArgs) -> CommandResult {
    match execute(&args) {
        Ok(result) => result,
        Err(error) => match error.downcast_ref::<ApplicationError>() {
            Some(application) => CommandResult::failure(
                "run",
                application.error_class(),
                format!("{error:#}"),
                super::exit_code_for(application),
            ),
            None => CommandResult::failure("run", "runtime", format!("{error:#}"), 1),
        },
    }
}

fn execute(args: &RunArgs) -> anyhow::Result<CommandResult> {
    let config = load_app_config(args.config_dir.clone())?;
    let now = parse_now(args.now.as_deref())?;

    let skus: Vec<SkuData> = read_json(&args.input)
        .with_context(|| format!("loading SKU input `{}`", args.input.display()))?;
    for sku in &skus {
        sku.validate().map_err(ApplicationError::from)?;
    }
    let history: Vec<PriceChangeRecord> = match &args.history {
        Some(path) => read_json(path)
            .with_context(|| format!("loading price history `{}`", path.display()))?,
        None => Vec::new(),
    };

    let resolver = ConfigResolver::from_settings(
        DirectoryConfigSource::new(&config.optimizer.config_dir),
        &config.optimizer,
    );
    let context = OptimizerContext::new(now)
        .with_history(&history)
        .with_elasticity(config.optimizer.elasticity);

    let run_id = Uuid::new_v4();
    info!(
        event_name = "cli.run.start",
        run_id = %run_id,
        skus = skus.len(),
        history = history.len(),
        config_dir = %config.optimizer.config_dir.display(),
        "running optimizer batch"
    );
    let outputs = run_optimizer_batch(&skus, &resolver, &context);

    if args.summary {
        return Ok(CommandResult::payload("run", &summarize(run_id, now, &outputs)));
    }

    let report = RunReport { run_id, generated_at: now, sku_count: outputs.len(), outputs: &outputs };
    Ok(CommandResult::payload("run", &report))
}

fn summarize(run_id: Uuid, now: DateTime<Utc>, outputs: &[OptimizerOutput]) -> RunSummary<'_> {
    let modes = group_by_mode(outputs)
        .into_iter()
        .map(|(mode, items)| (mode, items.into_iter().map(|output| output.sku.as_str()).collect()))
        .collect();
    let top_items = get_top_priority_items(outputs, TOP_ITEMS_LIMIT)
        .into_iter()
        .map(|output| TopItem {
            sku: &output.sku,
            action: output.decision.action,
            delta_pct: output.decision.delta_pct,
            urgency: output.urgency,
            summary: &output.summary,
        })
        .collect();

    RunSummary {
        run_id,
        generated_at: now,
        action_stats: get_action_stats(outputs),
        modes,
        blocked_by_guard: get_blocked_by_guard(outputs),
        top_items,
        total_impact: calculate_total_impact(outputs),
    }
}

fn parse_now(value: Option<&str>) -> Result<DateTime<Utc>, ApplicationError> {
    match value {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| {
                ApplicationError::InvalidInput(format!("--now `{raw}` is not RFC 3339: {error}"))
            }),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ApplicationError> {
    let raw = fs::read_to_string(path)
        .map_err(|error| ApplicationError::InvalidInput(format!("cannot read file: {error}")))?;
    serde_json::from_str(&raw)
        .map_err(|error| ApplicationError::InvalidInput(format!("invalid JSON: {error}")))
}

#[cfg(test)]
mod tests {
    use super::parse_now;

    #[test]
    fn parse_now_accepts_offsets_and_rejects_garbage() {
        let parsed = parse_now(Some("2026-05-01T12:00:00+03:00")).map(|now| now.to_rfc3339());
        assert_eq!(parsed.as_deref(), Ok("2026-05-01T09:00:00+00:00"));

        let error = parse_now(Some("yesterday")).map_err(|error| error.error_class());
        assert_eq!(error, Err("invalid_input"));
    }
}
