pub mod config;
pub mod doctor;
pub mod run;

use std::path::PathBuf;

use pricewise_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use pricewise_core::errors::ApplicationError;
use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;
pub const EXIT_SERIALIZATION: u8 = 4;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    /// Successful command whose stdout is the pretty-printed payload itself.
    pub fn payload<T: Serialize>(command: &str, payload: &T) -> Self {
        match serde_json::to_string_pretty(payload) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::from_error(command, &ApplicationError::from(error)),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_error(command: &str, error: &ApplicationError) -> Self {
        Self::failure(command, error.error_class(), error.to_string(), exit_code_for(error))
    }
}

pub fn exit_code_for(error: &ApplicationError) -> u8 {
    match error {
        ApplicationError::Configuration(_) => EXIT_CONFIG,
        ApplicationError::Domain(_) | ApplicationError::InvalidInput(_) => EXIT_INPUT,
        ApplicationError::Serialization(_) => EXIT_SERIALIZATION,
    }
}

/// Loads the app config with the `--config-dir` flag applied over file and env.
pub fn load_app_config(config_dir: Option<PathBuf>) -> Result<AppConfig, ApplicationError> {
    let options = LoadOptions {
        overrides: ConfigOverrides { config_dir, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    AppConfig::load(options).map_err(ApplicationError::from)
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
