//! Settle - activity correlation replay tool
//!
//! Drives the correlation engine from scripted browser signals and inspects
//! SDK configuration.

mod replay;
mod script;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use replay::{run_replay, ReplayConfig};
use settle_core::config::{ConfigLoader, ExportFormat, SettleConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "settle")]
#[command(version)]
#[command(about = "Replay browser activity through the Settle correlation engine", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SETTLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL script of engine inputs and host actions
    Replay {
        /// Script to replay
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for records (stdout when omitted and no export path is configured)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record format (beacon, apm)
        #[arg(short, long)]
        format: Option<String>,

        /// Print every engine transition to stderr
        #[arg(long)]
        journal: bool,

        /// Time origin of the scripted performance timeline (ms)
        #[arg(long, default_value = "0")]
        time_origin: f64,

        /// Print engine statistics in Prometheus text format
        #[arg(long)]
        prometheus: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Load and validate the configuration, failing on errors
    Check,

    /// Write the default configuration to a file
    Init {
        /// Destination (defaults to ~/.config/settle/config.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let config = load_config(cli.config.clone());

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.sdk.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Replay {
            input,
            output,
            format,
            journal,
            time_origin,
            prometheus,
        } => {
            let replay = ReplayConfig {
                output,
                format: format.as_deref().map(parse_format).transpose()?,
                journal,
                time_origin,
                ..Default::default()
            };
            replay_command(&config, &input, replay, prometheus).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Check => check_command(cli.config),
            ConfigAction::Init { path, force } => init_command(path, force),
        },
    }
}

fn load_config(cli_path: Option<PathBuf>) -> SettleConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            SettleConfig::default()
        }
    }
}

fn parse_format(format: &str) -> anyhow::Result<ExportFormat> {
    match format.to_lowercase().as_str() {
        "beacon" => Ok(ExportFormat::Beacon),
        "apm" => Ok(ExportFormat::Apm),
        other => bail!("Unknown format {:?} (expected beacon or apm)", other),
    }
}

async fn replay_command(
    config: &SettleConfig,
    input: &Path,
    replay: ReplayConfig,
    prometheus: bool,
) -> anyhow::Result<()> {
    let script = script::read_script(input).await?;
    let journal = replay.journal;
    let summary = run_replay(config, &replay, script).await?;

    if journal {
        for transition in &summary.transitions {
            eprintln!("{}", serde_json::to_string(transition)?);
        }
    }

    if prometheus {
        eprint!("{}", summary.stats.to_prometheus());
    } else {
        let stats = &summary.stats;
        eprintln!(
            "Replayed {} entries ({}ms virtual): {} opened, {} finalized, {} aborted, {} discarded",
            summary.entries,
            summary.ended_at,
            stats.events_opened,
            stats.events_finalized,
            stats.events_aborted,
            stats.events_discarded
        );
        eprintln!(
            "Records: {} emitted, {} deferred, {} delivery failures, {} exported, {} stranded",
            stats.records_emitted,
            stats.records_deferred,
            stats.delivery_failures,
            summary.export.records_received,
            summary.stranded
        );
    }

    if summary.export.export_failures > 0 {
        bail!("{} records failed to export", summary.export.export_failures);
    }
    Ok(())
}

fn check_command(cli_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ConfigLoader::new()
        .with_cli_path(cli_path)
        .load()
        .context("Configuration is invalid")?;

    let exclusions = config.effective_exclusions();
    settle_correlate::UrlExclusions::from_settings(&exclusions)
        .context("Exclusion patterns are invalid")?;

    println!(
        "Configuration OK ({} excluded URLs, {} patterns)",
        exclusions.urls.len(),
        exclusions.patterns.len()
    );
    Ok(())
}

fn init_command(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let Some(path) = path.or_else(ConfigLoader::default_config_path) else {
        bail!("No home directory found; pass --path");
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    ConfigLoader::new().save(&SettleConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("beacon").unwrap(), ExportFormat::Beacon);
        assert_eq!(parse_format("APM").unwrap(), ExportFormat::Apm);
        assert!(parse_format("csv").is_err());
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "settle", "-vv", "replay", "--input", "script.jsonl", "--format", "apm", "--journal",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Replay {
                input,
                format,
                journal,
                time_origin,
                ..
            } => {
                assert_eq!(input, PathBuf::from("script.jsonl"));
                assert_eq!(format.as_deref(), Some("apm"));
                assert!(journal);
                assert_eq!(time_origin, 0.0);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settle.toml");

        init_command(Some(path.clone()), false).unwrap();
        assert!(init_command(Some(path.clone()), false).is_err());

        let loaded = ConfigLoader::new().load_from_file(&path).unwrap();
        assert_eq!(loaded.engine, SettleConfig::default().engine);
    }
}
