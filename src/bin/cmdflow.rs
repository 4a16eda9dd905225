//! # Cmdflow CLI
//!
//! Sends commands to a remote editing host and validates engine
//! configuration. Results are printed as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmdflow_core::config::ConfigManager;
use cmdflow_core::engine::CommandEngine;
use cmdflow_core::execution::CommandSpec;
use cmdflow_core::logging::{init_structured_logging, log_error};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cmdflow")]
#[command(about = "Execute commands against a remote editing host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to load (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Print engine statistics after the command finishes
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a single command
    Exec {
        /// Remote operation name
        operation: String,

        /// Parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Response timeout override in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Execute a JSON file holding an array of commands
    Batch {
        /// Path to the batch file
        file: PathBuf,

        /// Run all commands concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Validate the configuration and print the merged result
    ValidateConfig,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Exec { .. } => "exec",
            Commands::Batch { .. } => "batch",
            Commands::ValidateConfig => "validate-config",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let operation = cli.command.name();

    let result = run(cli).await;
    match result {
        Ok(success) => process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            log_error("cli", operation, &format!("{e:#}"), None);
            eprintln!("❌ {e:#}");
            process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let manager = ConfigManager::load_from_directory_with_env(
        cli.config_dir.clone(),
        &cli.environment,
        None,
    )
    .context("failed to load configuration")?;
    init_structured_logging(&manager.config().logging);

    match cli.command {
        Commands::ValidateConfig => {
            validate_config(&manager)?;
            Ok(true)
        }
        Commands::Exec {
            operation,
            params,
            timeout_ms,
        } => {
            let params: Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let engine = CommandEngine::start(manager.config().clone()).await?;
            let result = engine
                .execute_single_command(operation, params, timeout_ms.map(Duration::from_millis))
                .await;
            print_json(&result)?;
            finish(&engine, cli.stats).await?;
            Ok(result.success)
        }
        Commands::Batch { file, parallel } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read batch file {}", file.display()))?;
            let specs: Vec<CommandSpec> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of commands", file.display()))?;
            let engine = CommandEngine::start(manager.config().clone()).await?;
            let results = engine.execute_batch(specs, parallel).await;
            print_json(&results)?;
            finish(&engine, cli.stats).await?;
            Ok(results.iter().all(|r| r.success))
        }
    }
}

fn validate_config(manager: &Arc<ConfigManager>) -> Result<()> {
    println!("🔧 Validating Cmdflow Configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();
    print_json(manager.config())?;
    println!();
    println!("✅ Configuration is valid");
    Ok(())
}

async fn finish(engine: &CommandEngine, show_stats: bool) -> Result<()> {
    if show_stats {
        print_json(&json!({ "stats": engine.get_stats() }))?;
    }
    engine.shutdown().await;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
