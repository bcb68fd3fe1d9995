use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use pricewise_cli::commands::config::{self, ConfigArgs};
use pricewise_cli::commands::doctor;
use pricewise_cli::commands::run::{self, RunArgs};
use serde_json::{json, Value};
use tempfile::TempDir;

const NOW: &str = "2026-06-10T12:00:00Z";

#[test]
fn run_prints_one_decision_per_sku_in_input_order() {
    with_env(&[], || {
        let workspace = workspace();
        let result = run::run(run_args(&workspace, None, false));
        assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert!(payload["run_id"].is_string());
        assert_eq!(payload["sku_count"], 2);
        assert_eq!(payload["outputs"][0]["sku"], "PAN-S");
        assert_eq!(payload["outputs"][0]["decision"]["action"], "UP");
        assert_eq!(payload["outputs"][0]["price_recommendation"]["trigger"], "LOW_STOCK");
        assert_eq!(payload["outputs"][1]["sku"], "NEW-1");
        assert_eq!(payload["outputs"][1]["decision"]["action"], "HOLD");
        assert_eq!(payload["outputs"][1]["decision"]["priority_level"], 1);
        assert_eq!(payload["outputs"][1]["urgency"], "warning");
    });
}

#[test]
fn run_summary_reports_aggregates() {
    with_env(&[], || {
        let workspace = workspace();
        let result = run::run(run_args(&workspace, None, true));
        assert_eq!(result.exit_code, 0, "expected successful summary: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["action_stats"]["total"], 2);
        assert_eq!(payload["action_stats"]["up"], 1);
        assert_eq!(payload["action_stats"]["hold"], 1);
        assert_eq!(payload["blocked_by_guard"]["DATA_GUARD"][0], "NEW-1");
        assert_eq!(payload["modes"]["GROWTH"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["total_impact"]["skus_with_impact"], 1);
    });
}

#[test]
fn run_caps_second_family_member_and_respects_history_cooldown() {
    with_env(&[], || {
        let workspace = workspace();
        write(
            &workspace.config_dir().join("families.toml"),
            r#"
[[families]]
family_id = "pans"
skus = ["PAN-S", "PAN-L"]
"#,
        );
        write_json(
            &workspace.path().join("skus.json"),
            &json!([low_stock_sku("PAN-S"), low_stock_sku("PAN-L"), low_stock_sku("LID-1")]),
        );
        let history = workspace.path().join("history.json");
        write_json(
            &history,
            &json!([{
                "sku": "LID-1",
                "timestamp": "2026-06-09T12:00:00Z",
                "action": "UP",
                "delta_pct": 0.05,
                "trigger": "LOW_STOCK",
                "old_price": "950.00",
                "new_price": "1000.00",
                "applied_by": "optimizer"
            }]),
        );

        let result = run::run(run_args(&workspace, Some(history), false));
        assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["outputs"][0]["decision"]["action"], "UP");
        assert_eq!(payload["outputs"][1]["decision"]["action"], "HOLD");
        assert_eq!(payload["outputs"][1]["decision"]["blocked_by"][0], "FAMILY_GUARD");
        assert_eq!(payload["outputs"][2]["decision"]["blocked_by"][0], "COOLDOWN_GUARD");
    });
}

#[test]
fn run_degrades_to_defaults_when_tables_are_broken() {
    with_env(&[], || {
        let workspace = workspace();
        write(&workspace.config_dir().join("optimizer.toml"), "[global\nbroken = ");

        let result = run::run(run_args(&workspace, None, false));
        assert_eq!(result.exit_code, 0, "broken tables must not abort the run");
        let payload = parse_payload(&result.output);
        assert_eq!(payload["outputs"][0]["decision"]["action"], "UP");
    });
}

#[test]
fn run_rejects_missing_input_file() {
    with_env(&[], || {
        let workspace = workspace();
        let mut args = run_args(&workspace, None, false);
        args.input = workspace.path().join("missing.json");

        let result = run::run(args);
        assert_eq!(result.exit_code, 3, "expected invalid input exit code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn run_rejects_unparseable_now() {
    with_env(&[], || {
        let workspace = workspace();
        let mut args = run_args(&workspace, None, false);
        args.now = Some("tomorrow".to_string());

        let payload = parse_payload(&run::run(args).output);
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn run_reports_config_failure_for_invalid_env_override() {
    with_env(&[("PRICEWISE_CACHE_TTL_SECS", "soon")], || {
        let workspace = workspace();
        let result = run::run(run_args(&workspace, None, false));
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_attributes_each_key_to_its_layer() {
    with_env(&[], || {
        let workspace = workspace();
        write(
            &workspace.config_dir().join("optimizer.toml"),
            r#"
[global]
cooldown_days = 4.0

[category.cookware]
min_margin_pct = 0.15

[sku_override.PAN-S]
max_price_step_pct = 0.05
"#,
        );
        write(&workspace.config_dir().join("gold_skus.toml"), "skus = [\"PAN-S\"]\n");

        let result = config::run(ConfigArgs {
            sku: "PAN-S".to_string(),
            category: "Cookware".to_string(),
            config_dir: Some(workspace.config_dir()),
        });
        assert_eq!(result.exit_code, 0, "expected config output: {}", result.output);

        let output = result.output;
        assert!(output.contains("- cooldown_days = 4.0 (source: global"));
        assert!(output.contains("- min_margin_pct = 0.15 (source: category"));
        assert!(output.contains("- max_price_step_pct = 0.05 (source: sku_override"));
        assert!(output.contains("- ctr_benchmark = 1.5 (source: default)"));
        assert!(output.contains("- gold_sku = yes"));
    });
}

#[test]
fn config_fails_on_unparseable_table() {
    with_env(&[], || {
        let workspace = workspace();
        write(&workspace.config_dir().join("optimizer.toml"), "[global\n");

        let result = config::run(ConfigArgs {
            sku: "PAN-S".to_string(),
            category: "cookware".to_string(),
            config_dir: Some(workspace.config_dir()),
        });
        assert_eq!(result.exit_code, 2);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_with_consistent_tables() {
    with_env(&[], || {
        let workspace = workspace();
        write(
            &workspace.config_dir().join("manual_locks.toml"),
            r#"
[[locks]]
sku = "PAN-S"
until = "2099-01-01T00:00:00Z"
reason = "supplier contract"
"#,
        );

        let result = doctor::run(true, Some(workspace.config_dir()));
        assert_eq!(result.exit_code, 0, "expected passing doctor: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
    });
}

#[test]
fn doctor_flags_expired_locks() {
    with_env(&[], || {
        let workspace = workspace();
        write(
            &workspace.config_dir().join("manual_locks.toml"),
            r#"
[[locks]]
sku = "PAN-S"
until = "2001-01-01T00:00:00Z"
"#,
        );

        let result = doctor::run(true, Some(workspace.config_dir()));
        assert_eq!(result.exit_code, 5);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let failed: Vec<&str> = payload["checks"]
            .as_array()
            .map(|checks| {
                checks
                    .iter()
                    .filter(|check| check["status"] == "fail")
                    .filter_map(|check| check["name"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(failed, vec!["manual_lock_expiry"]);
    });
}

#[test]
fn misspelled_optimizer_key_is_reported_by_doctor_and_config() {
    with_env(&[], || {
        let workspace = workspace();
        write(&workspace.config_dir().join("optimizer.toml"), "[global]\nmin_margin = 0.2\n");

        let result = doctor::run(true, Some(workspace.config_dir()));
        assert_eq!(result.exit_code, 5);
        let payload = parse_payload(&result.output);
        let table_check = payload["checks"].as_array().and_then(|checks| {
            checks.iter().find(|check| check["name"] == "table:optimizer.toml").cloned()
        });
        assert_eq!(table_check.as_ref().map(|check| check["status"].clone()), Some(json!("fail")));
        assert!(table_check
            .as_ref()
            .and_then(|check| check["details"].as_str())
            .is_some_and(|details| details.contains("min_margin")));

        let result = config::run(ConfigArgs {
            sku: "PAN-S".to_string(),
            category: "cookware".to_string(),
            config_dir: Some(workspace.config_dir()),
        });
        assert_eq!(result.exit_code, 2);
    });
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_dir(&self) -> PathBuf {
        self.dir.path().join("optimizer")
    }
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    fs::create_dir_all(dir.path().join("optimizer")).expect("config dir should be created");
    let workspace = Workspace { dir };
    write_json(
        &workspace.path().join("skus.json"),
        &json!([
            low_stock_sku("PAN-S"),
            {
                "sku": "NEW-1",
                "nm_id": 2,
                "category": "cookware",
                "current_price": 500.0,
                "stock_total": 40,
                "orders_per_day": 1.0,
                "margin": 0.25,
                "clicks": 3,
                "orders": 0
            }
        ]),
    );
    workspace
}

fn low_stock_sku(code: &str) -> Value {
    json!({
        "sku": code,
        "nm_id": 1,
        "title": "Frying pan",
        "category": "cookware",
        "stock_total": 0,
        "in_transit": 0,
        "orders_per_day": 5.0,
        "current_price": 1000.0,
        "cost_price": 800.0,
        "margin": 0.2,
        "impressions": 4000,
        "clicks": 50,
        "ctr": 2.0,
        "cart_adds": 10,
        "cr_cart": 20.0,
        "orders": 15,
        "cr_order": 2.0
    })
}

fn run_args(workspace: &Workspace, history: Option<PathBuf>, summary: bool) -> RunArgs {
    RunArgs {
        input: workspace.path().join("skus.json"),
        history,
        config_dir: Some(workspace.config_dir()),
        now: Some(NOW.to_string()),
        summary,
    }
}

fn write(path: &Path, contents: &str) {
    fs::write(path, contents).expect("fixture should be written");
}

fn write_json(path: &Path, value: &Value) {
    write(path, &serde_json::to_string_pretty(value).expect("fixture should serialize"));
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PRICEWISE_CONFIG_DIR",
        "PRICEWISE_CACHE_TTL_SECS",
        "PRICEWISE_ELASTICITY",
        "PRICEWISE_LOGGING_LEVEL",
        "PRICEWISE_LOGGING_FORMAT",
        "PRICEWISE_LOG_LEVEL",
        "PRICEWISE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
