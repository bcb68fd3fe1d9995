use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use pricewise_core::config::AppConfig;
use pricewise_core::optimizer::settings::{ConfigSource, ConfigTables, DirectoryConfigSource};
use serde::Serialize;

use super::{load_app_config, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name: name.into(), status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub const EXIT_DOCTOR_FAILED: u8 = 5;

pub fn run(json_output: bool, config_dir: Option<PathBuf>) -> CommandResult {
    let report = build_report(config_dir, Utc::now());
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR_FAILED };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(config_dir: Option<PathBuf>, now: DateTime<Utc>) -> DoctorReport {
    let mut checks = Vec::new();

    match load_app_config(config_dir) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_tables(&config, now));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            checks.push(DoctorCheck::new(
                "optimizer_tables",
                CheckStatus::Skipped,
                "skipped because configuration did not load",
            ));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_tables(config: &AppConfig, now: DateTime<Utc>) -> Vec<DoctorCheck> {
    let source = DirectoryConfigSource::new(&config.optimizer.config_dir);
    let mut checks: Vec<DoctorCheck> = source
        .probe()
        .into_iter()
        .map(|(file, result)| {
            let path = source.dir().join(file);
            match result {
                Ok(()) if path.exists() => DoctorCheck::new(
                    format!("table:{file}"),
                    CheckStatus::Pass,
                    format!("parsed `{}`", path.display()),
                ),
                Ok(()) => DoctorCheck::new(
                    format!("table:{file}"),
                    CheckStatus::Pass,
                    format!("`{}` absent; layer is empty", path.display()),
                ),
                Err(error) => {
                    DoctorCheck::new(format!("table:{file}"), CheckStatus::Fail, error.to_string())
                }
            }
        })
        .collect();

    match source.load() {
        Ok(tables) => {
            checks.push(check_lock_expiry(&tables, now));
            checks.push(check_family_membership(&tables));
        }
        Err(_) => {
            for name in ["manual_lock_expiry", "family_membership"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because a table file did not parse",
                ));
            }
        }
    }
    checks
}

fn check_lock_expiry(tables: &ConfigTables, now: DateTime<Utc>) -> DoctorCheck {
    let expired: Vec<&str> = tables
        .manual_locks
        .iter()
        .filter(|lock| !lock.is_active(now))
        .map(|lock| lock.sku.as_str())
        .collect();

    if expired.is_empty() {
        let active = tables.manual_locks.len();
        return DoctorCheck::new(
            "manual_lock_expiry",
            CheckStatus::Pass,
            format!("{active} active lock(s), none expired"),
        );
    }
    DoctorCheck::new(
        "manual_lock_expiry",
        CheckStatus::Fail,
        format!("expired locks should be removed: {}", expired.join(", ")),
    )
}

/// A SKU may belong to at most one family, and ladders may only name members.
fn check_family_membership(tables: &ConfigTables) -> DoctorCheck {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut problems = Vec::new();

    for family in &tables.families {
        for sku in &family.skus {
            if let Some(previous) = owners.insert(sku, &family.family_id) {
                problems.push(format!("`{sku}` is in both `{previous}` and `{}`", family.family_id));
            }
        }
        for sku in family.price_ladder.iter().flatten() {
            if !family.contains(sku) {
                problems.push(format!(
                    "ladder of `{}` names non-member `{sku}`",
                    family.family_id
                ));
            }
        }
    }

    if problems.is_empty() {
        return DoctorCheck::new(
            "family_membership",
            CheckStatus::Pass,
            format!("{} family definition(s) consistent", tables.families.len()),
        );
    }
    DoctorCheck::new("family_membership", CheckStatus::Fail, problems.join("; "))
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
