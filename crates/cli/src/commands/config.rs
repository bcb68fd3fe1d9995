use std::path::PathBuf;

use pricewise_core::config::AppConfig;
use pricewise_core::errors::ApplicationError;
use pricewise_core::optimizer::settings::{
    ConfigLayer, ConfigSource, ConfigTables, DirectoryConfigSource, OPTIMIZER_CONFIG_KEYS,
    OPTIMIZER_FILE,
};
use serde_json::Value;

use super::{load_app_config, CommandResult};

#[derive(Clone, Debug, Default)]
pub struct ConfigArgs {
    pub sku: String,
    pub category: String,
    pub config_dir: Option<PathBuf>,
}

pub fn run(args: ConfigArgs) -> CommandResult {
    match render(&args) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::from_error("config", &error),
    }
}

fn render(args: &ConfigArgs) -> Result<String, ApplicationError> {
    let app = load_app_config(args.config_dir.clone())?;
    let source = DirectoryConfigSource::new(&app.optimizer.config_dir);
    let tables = source.load()?;

    let effective = tables.resolve(&args.sku, &args.category);
    let values = serde_json::to_value(&effective)?;

    let mut lines = vec![format!(
        "effective optimizer config for `{}` in `{}` \
         (source precedence: sku_override > category > global > default):",
        args.sku, args.category
    )];
    for key in OPTIMIZER_CONFIG_KEYS {
        let value = values.get(*key).map(render_value).unwrap_or_else(|| "<unset>".to_string());
        let layer = tables.source_of(&args.sku, &args.category, key);
        lines.push(render_line(key, &value, layer_label(layer, &source)));
    }

    lines.push(String::new());
    lines.extend(reference_lines(&app, &tables, &args.sku));
    Ok(lines.join("\n"))
}

fn reference_lines(app: &AppConfig, tables: &ConfigTables, sku: &str) -> Vec<String> {
    let gold = if tables.gold_skus.contains(sku) { "yes" } else { "no" };
    let locks: Vec<String> = tables
        .manual_locks
        .iter()
        .filter(|lock| lock.sku == sku)
        .map(|lock| {
            let reason = lock.reason.as_deref().unwrap_or("no reason given");
            format!("until {} ({reason})", lock.until.to_rfc3339())
        })
        .collect();
    let family = tables
        .family_for_sku(sku)
        .map(|family| match family.ladder_position(sku) {
            Some(position) => format!("{} (ladder position {position})", family.family_id),
            None => family.family_id.clone(),
        })
        .unwrap_or_else(|| "<none>".to_string());

    vec![
        format!("- config_dir = {}", app.optimizer.config_dir.display()),
        format!("- gold_sku = {gold}"),
        format!(
            "- manual_locks = {}",
            if locks.is_empty() { "<none>".to_string() } else { locks.join("; ") }
        ),
        format!("- family = {family}"),
    ]
}

fn layer_label(layer: ConfigLayer, source: &DirectoryConfigSource) -> String {
    let file = source.dir().join(OPTIMIZER_FILE);
    match layer {
        ConfigLayer::Default => "default".to_string(),
        ConfigLayer::Global => format!("global ({})", file.display()),
        ConfigLayer::Category => format!("category ({})", file.display()),
        ConfigLayer::SkuOverride => format!("sku_override ({})", file.display()),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
