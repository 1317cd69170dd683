//! `aps-sim`: workload simulator and configuration checker

use anyhow::Context;
use aps_core::{init_tracing, PlatformConfig};
use aps_platform::{run_simulator, SimulatorConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "aps-sim", version, about = "Adaptive platform services workload simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a seeded synthetic workload through every component
    Simulate {
        /// Distinct subjects
        #[arg(long, default_value_t = 50)]
        subjects: u32,
        /// Steps to run, one simulated second each
        #[arg(long, default_value_t = 2_000)]
        events: u64,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Chance that a fetch meets transient upstream failures
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,
        /// Platform configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print the effective settings
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        path: PathBuf,
    },
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Option<PlatformConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let config = PlatformConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?
        .with_env_overrides();
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            subjects,
            events,
            seed,
            failure_rate,
            config,
        } => {
            let defaults = SimulatorConfig::default();
            let platform = load(config.as_ref())?
                .unwrap_or_else(|| defaults.platform.clone().with_env_overrides());
            init_tracing(&platform.telemetry).context("initializing tracing")?;

            let report = run_simulator(SimulatorConfig {
                seed,
                subjects,
                events,
                failure_rate,
                platform,
            })
            .await
            .context("simulation aborted")?;

            println!("{}", report.generate_text());
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { path } => {
            let config = load(Some(&path))?.unwrap_or_default();
            let rendered = toml::to_string_pretty(&config).context("rendering configuration")?;
            println!("# {} is valid\n", path.display());
            println!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
