//! # RuleFlow CLI
//!
//! Operator tooling over the file-backed engine: evaluate a record,
//! fan a batch across workers, execute a DMN document, or validate a
//! catalog before deploying it.
//!
//! ## Usage
//!
//! ```bash
//! ruleflow evaluate --rules rules.json --data '{"issue": 35}'
//! ruleflow batch --rules rules.json --input records.json --workers 4
//! ruleflow dmn --file decisions.dmn --data '{"can": "giap"}'
//! ruleflow validate --rules rules.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ruleflow::executor::BatchOptions;
use ruleflow::service::DmnSource;
use ruleflow::{BackendKind, CancelToken, Config, ExecuteOptions, RuleService};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ruleflow", version, about = "Business rules evaluation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate one record against a rule-set file
    Evaluate {
        /// Rule-set JSON file
        #[arg(long)]
        rules: PathBuf,
        /// Conditions JSON file
        #[arg(long)]
        conditions: Option<PathBuf>,
        /// Input record as inline JSON
        #[arg(long)]
        data: String,
        /// Report per-rule outcomes without side effects
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate a JSON array of records through the worker pool
    Batch {
        /// Rule-set JSON file
        #[arg(long)]
        rules: PathBuf,
        /// Conditions JSON file
        #[arg(long)]
        conditions: Option<PathBuf>,
        /// File containing a JSON array of records
        #[arg(long)]
        input: PathBuf,
        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,
        /// Report outcomes without side effects
        #[arg(long)]
        dry_run: bool,
    },
    /// Execute a DMN decision document
    Dmn {
        /// DMN XML file
        #[arg(long)]
        file: PathBuf,
        /// Input record as inline JSON
        #[arg(long)]
        data: String,
        /// Report per-row outcomes without side effects
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a catalog without installing it
    Validate {
        /// Rule-set JSON file
        #[arg(long)]
        rules: PathBuf,
        /// Conditions JSON file
        #[arg(long)]
        conditions: Option<PathBuf>,
    },
}

fn file_service(rules: PathBuf, conditions: Option<PathBuf>) -> Result<RuleService> {
    let mut config = Config::default();
    config.storage.backend = BackendKind::File;
    config.storage.rules_config_path = rules;
    config.storage.conditions_config_path = conditions;
    config.storage.data_dir = std::env::temp_dir().join("ruleflow-cli");
    RuleService::from_config(config).context("failed to load the rule catalog")
}

fn parse_record(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).context("--data must be valid JSON")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Evaluate {
            rules,
            conditions,
            data,
            dry_run,
        } => {
            let service = file_service(rules, conditions)?;
            let options = ExecuteOptions {
                dry_run,
                ..Default::default()
            };
            let result = service.execute(&parse_record(&data)?, &options, &CancelToken::new())?;
            service.flush_logs();
            print_json(&result)
        }
        Command::Batch {
            rules,
            conditions,
            input,
            workers,
            dry_run,
        } => {
            let service = file_service(rules, conditions)?;
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&content).context("input must be a JSON array of records")?;
            let options = BatchOptions {
                max_workers: workers,
                dry_run,
            };
            let result = service.execute_batch(records, &options, &CancelToken::new())?;
            service.flush_logs();
            print_json(&result)
        }
        Command::Dmn {
            file,
            data,
            dry_run,
        } => {
            let service = file_service(std::env::temp_dir().join("ruleflow-empty.json"), None)?;
            let options = ExecuteOptions {
                dry_run,
                ..Default::default()
            };
            let result = service.execute_dmn(
                &DmnSource::File(file),
                &parse_record(&data)?,
                &options,
                &CancelToken::new(),
            )?;
            service.flush_logs();
            print_json(&result)
        }
        Command::Validate { rules, conditions } => {
            let service = file_service(rules, conditions)?;
            let report = service.validate();
            print_json(&report)?;
            if !report.ok {
                bail!("catalog validation failed");
            }
            Ok(())
        }
    }
}
