//! Zentinel API Lifecycle - CLI Entry Point

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_api_lifecycle::{
    normalize, LifecycleConfig, LifecycleEngine, ManualClock, RequestDescriptor, SchemaDocument,
    SchemaTree,
};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-api-lifecycle",
    about = "API deprecation, sunset and brownout lifecycle engine for Zentinel",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "api-lifecycle.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and exit
    Validate,

    /// Print default configuration and exit
    PrintConfig,

    /// Evaluate one request against the configured policies
    Evaluate {
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request path
        #[arg(short, long)]
        path: String,

        /// Evaluate at this instant instead of now
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,

        /// Print Prometheus metrics after the decision
        #[arg(long)]
        metrics: bool,
    },

    /// Annotate an OpenAPI JSON document and print the result
    Annotate {
        /// OpenAPI document (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Annotate at this instant instead of now
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, zentinel_api_lifecycle::DateParseError> {
    normalize(s)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::PrintConfig => {
            let default_config = include_str!("../config/default-config.yaml");
            println!("{}", default_config);
        }
        Command::Validate => {
            if !args.config.exists() {
                anyhow::bail!("Configuration file not found: {:?}", args.config);
            }
            let config = load_config(&args.config)?;
            config.build_registry()?;
            println!("Configuration is valid ({} policies)", config.policies.len());
        }
        Command::Evaluate {
            method,
            path,
            at,
            metrics,
        } => {
            let engine = engine_at(&load_config(&args.config)?, at)?;
            let request = RequestDescriptor::new(method.to_ascii_uppercase(), path);

            match engine.process_request(&request) {
                None => println!("no policy matches {} {}", request.method, request.path),
                Some(response) => {
                    println!("action: {}", response.action);
                    if let Some(status) = response.status_code {
                        println!("status: {}", status);
                    }
                    for (name, value) in &response.headers {
                        println!("{}: {}", name, value);
                    }
                    if let Some(body) = &response.body {
                        println!();
                        println!("{}", body);
                    }
                }
            }

            if metrics {
                match engine.metrics() {
                    Some(collector) => print!("{}", collector.encode()?),
                    None => info!("Metrics are disabled in configuration"),
                }
            }
        }
        Command::Annotate { schema, at } => {
            let engine = engine_at(&load_config(&args.config)?, at)?;
            let content = std::fs::read_to_string(&schema)
                .with_context(|| format!("failed to read schema {}", schema.display()))?;
            let document: SchemaDocument = serde_json::from_str(&content)
                .with_context(|| format!("invalid schema {}", schema.display()))?;

            let mut tree = SchemaTree::new();
            let root = tree.add(document);
            let report = engine.annotate_schema(&mut tree, root);
            info!(
                deprecated = report.marked_deprecated,
                upcoming = report.marked_upcoming,
                "Schema annotated"
            );

            if let Some(document) = tree.document(root) {
                println!("{}", serde_json::to_string_pretty(document)?);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<LifecycleConfig> {
    if path.exists() {
        info!(path = ?path, "Loading configuration");
        LifecycleConfig::from_file(path)
    } else {
        info!("Using default configuration");
        Ok(LifecycleConfig::default())
    }
}

fn engine_at(config: &LifecycleConfig, at: Option<DateTime<Utc>>) -> Result<LifecycleEngine> {
    let engine = LifecycleEngine::from_config(config)?;
    Ok(match at {
        Some(now) => engine.with_clock(Arc::new(ManualClock::new(now))),
        None => engine,
    })
}
