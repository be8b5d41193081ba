use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use vidwall_common::image::validate_image;
use vidwall_common::probe::inspect;
use vidwall_common::target::redact_url;
use vidwall_common::{
    resolve, CommandBuilder, DisplayEnumerator, DisplayOutput, ErrorReporting, Layout, Liveness,
    ProgramConfig, VidwallError,
};
use vidwall_config::Config;

#[derive(Parser)]
#[command(name = "vidwall-cli")]
#[command(about = "vidwall-cli (video wall diagnostics)")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/vidwall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List display outputs as the daemon sees them
    Outputs {
        #[arg(long)]
        json: bool,
    },

    /// Show where each configured stream would be placed right now
    Layout {
        #[arg(long)]
        json: bool,
    },

    /// Check whether a stream URL is currently serving
    Probe {
        url: String,

        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        #[arg(long)]
        json: bool,
    },

    /// Validate configuration, required programs and placeholder images
    Check,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    url: String,
    liveness: Liveness,
    streams: Option<usize>,
    error: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("{}", e.user_friendly_message()))
}

/// Programs from the config file if there is a usable one, defaults otherwise.
fn programs(path: Option<&PathBuf>) -> ProgramConfig {
    match load_config(path) {
        Ok(config) => config.program_config(),
        Err(e) => {
            log::debug!("Using default programs: {}", e);
            ProgramConfig::default()
        }
    }
}

async fn query_outputs(command_builder: CommandBuilder) -> anyhow::Result<Vec<DisplayOutput>> {
    let enumerator = DisplayEnumerator::new(command_builder)
        .map_err(|e| anyhow::anyhow!("{}", e.user_friendly_message()))?;
    enumerator
        .query()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_friendly_message()))
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Outputs { json } => {
            let outputs = query_outputs(CommandBuilder::new(programs(config_path))).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outputs)?);
            } else {
                print_outputs(&outputs);
            }
        }

        Commands::Layout { json } => {
            let config = load_config(config_path)?;
            let targets = config
                .stream_targets()
                .map_err(|e| anyhow::anyhow!("{}", e.user_friendly_message()))?;
            let outputs = query_outputs(CommandBuilder::new(config.program_config())).await?;
            let layout = resolve(&outputs, &targets);
            if json {
                println!("{}", serde_json::to_string_pretty(&layout)?);
            } else {
                print_layout(&layout);
            }
        }

        Commands::Probe { url, timeout, json } => {
            let command_builder = CommandBuilder::new(programs(config_path));
            let report = match inspect(&command_builder, &url, timeout).await {
                Ok(streams) => ProbeReport {
                    url: redact_url(&url),
                    liveness: Liveness::Active,
                    streams: Some(streams),
                    error: None,
                },
                Err(e) => ProbeReport {
                    url: redact_url(&url),
                    liveness: Liveness::Inactive,
                    streams: None,
                    error: Some(VidwallError::from(e).user_friendly_message()),
                },
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match (&report.streams, &report.error) {
                    (Some(streams), _) => println!("✓ {} is active ({} stream(s))", report.url, streams),
                    (None, Some(error)) => println!("✗ {} is inactive: {}", report.url, error),
                    (None, None) => println!("✗ {} is inactive", report.url),
                }
            }

            if report.liveness == Liveness::Inactive {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Check => {
            let config = load_config(config_path)?;
            let mut problems = 0;

            let command_builder = CommandBuilder::new(config.program_config());
            for program in command_builder.missing_programs() {
                println!("✗ Program not found in PATH: {}", program);
                problems += 1;
            }

            let targets = config
                .stream_targets()
                .map_err(|e| anyhow::anyhow!("{}", e.user_friendly_message()))?;
            for target in targets {
                match validate_image(&target.placeholder) {
                    Ok(()) => println!("✓ {}: {} ({:?})", target.id, target.display_url(), target.placeholder),
                    Err(e) => {
                        println!("✗ {}: {}", target.id, e.user_friendly_message());
                        problems += 1;
                    }
                }
            }

            if problems > 0 {
                println!("{} problem(s) found", problems);
                return Ok(ExitCode::FAILURE);
            }
            println!("Configuration OK");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_outputs(outputs: &[DisplayOutput]) {
    if outputs.is_empty() {
        println!("No outputs found");
        return;
    }

    for output in outputs {
        let state = if output.connected { "connected" } else { "disconnected" };
        let geometry = output
            .geometry
            .map_or_else(|| "-".to_string(), |g| g.to_string());
        let primary = if output.primary { " primary" } else { "" };
        println!("{}: {}{} {}", output.name, state, primary, geometry);
    }
}

fn print_layout(layout: &Layout) {
    if layout.assignments.is_empty() && layout.unassigned.is_empty() {
        println!("No streams configured");
        return;
    }

    for (id, assignment) in &layout.assignments {
        println!(
            "{}: {} on {}",
            id,
            assignment.region,
            assignment.output.as_deref().unwrap_or("(explicit region)")
        );
    }
    for (id, reason) in &layout.unassigned {
        println!("{}: unassigned ({})", id, reason);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
