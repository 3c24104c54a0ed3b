//! Qflow CLI
//!
//! Plans and runs flow definitions from JSON files.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use qflow_plan::FlowDefinition;
use qflow_runtime::{Qflow, QflowConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qflow")]
#[command(about = "Qflow - parallel flow execution with predictive resource warm-up", long_about = None)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the execution groups of a flow
    Plan {
        /// Path to the flow definition
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a flow
    Run {
        /// Path to the flow definition
        #[arg(short, long)]
        file: PathBuf,
        /// Path to a service configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// WASM module for `wasm:NAME` steps, as NAME=PATH (.wasm or .wat)
        #[arg(short, long = "module", value_parser = parse_binding)]
        modules: Vec<(String, String)>,
        /// Connection pool for `net:NAME` steps, as NAME=HOST:PORT
        #[arg(long = "connection", value_parser = parse_binding)]
        connections: Vec<(String, String)>,
        /// Print the service status after the run
        #[arg(long)]
        status: bool,
    },
    /// Print the default service configuration
    Config,
}

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {raw}")),
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_flow(path: &Path) -> Result<FlowDefinition> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    FlowDefinition::from_json(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

fn read_config(path: Option<&Path>) -> Result<QflowConfig> {
    let Some(path) = path else {
        return Ok(QflowConfig::default());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    QflowConfig::from_json(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

fn read_module(path: &str) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).wrap_err_with(|| format!("reading {path}"))?;
    if path.ends_with(".wat") {
        return wat::parse_bytes(&bytes)
            .map(|b| b.into_owned())
            .map_err(|e| eyre!("parsing {path}: {e}"));
    }
    Ok(bytes)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Plan { file } => {
            let flow = read_flow(&file)?;
            let qflow = Qflow::new(QflowConfig::default())?;
            print_json(&qflow.plan_flow(&flow)?)
        }
        Commands::Run {
            file,
            config,
            modules,
            connections,
            status,
        } => {
            let flow = read_flow(&file)?;
            let qflow = Qflow::new(read_config(config.as_deref())?)?;
            for (name, path) in &modules {
                let bytes = read_module(path)?;
                qflow
                    .register_module(name, &bytes, flow.validation_layers.clone())
                    .await?;
            }
            for (name, addr) in &connections {
                qflow.add_connection_pool(name, addr, 0, 10)?;
            }

            info!(flow = %flow.flow_type, steps = flow.steps.len(), "running flow");
            let outcome = qflow.submit_flow(&flow).await;
            if status {
                print_json(&qflow.status())?;
            }
            qflow.stop().await;

            let result = outcome?;
            print_json(&result)?;
            if !result.success {
                bail!("flow {} failed: {}", flow.flow_type, result.errors.join("; "));
            }
            Ok(())
        }
        Commands::Config => print_json(&QflowConfig::default()),
    }
}
