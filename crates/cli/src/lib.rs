pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pricewise_core::config::{AppConfig, LogFormat};

use commands::config::ConfigArgs;
use commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "pricewise",
    about = "Pricewise pricing decision CLI",
    long_about = "Run the pricing decision engine over SKU snapshots, inspect layered optimizer config, and check readiness.",
    after_help = "Examples:\n  pricewise run --input skus.json --summary\n  pricewise config --sku CND-001 --category candles\n  pricewise doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Decide UP/DOWN/HOLD for every SKU in a JSON snapshot")]
    Run {
        #[arg(long, help = "JSON array of SKU records")]
        input: PathBuf,
        #[arg(long, help = "JSON array of applied price changes, for cooldown and family limits")]
        history: Option<PathBuf>,
        #[arg(long, help = "Directory holding the optimizer TOML tables")]
        config_dir: Option<PathBuf>,
        #[arg(long, help = "Evaluation time as RFC 3339; defaults to now")]
        now: Option<String>,
        #[arg(long, help = "Print batch aggregates instead of every decision")]
        summary: bool,
    },
    #[command(about = "Show the effective optimizer config for one SKU with source attribution")]
    Config {
        #[arg(long)]
        sku: String,
        #[arg(long)]
        category: String,
        #[arg(long, help = "Directory holding the optimizer TOML tables")]
        config_dir: Option<PathBuf>,
    },
    #[command(about = "Validate app config and optimizer tables")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Directory holding the optimizer TOML tables")]
        config_dir: Option<PathBuf>,
    },
}

pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A second init in the same process (tests) is ignored.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(Default::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Run { input, history, config_dir, now, summary } => {
            commands::run::run(RunArgs { input, history, config_dir, now, summary })
        }
        Command::Config { sku, category, config_dir } => {
            commands::config::run(ConfigArgs { sku, category, config_dir })
        }
        Command::Doctor { json, config_dir } => commands::doctor::run(json, config_dir),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
