use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use starpipe::{
    config::Config,
    pipeline::{self, PipelineKind},
};

#[derive(Parser)]
#[command(name = "starpipe")]
#[command(version)]
#[command(about = "Idempotent dimensional-load ETL pipelines with a post-load validation gate")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to starpipe.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, transform and load one pipeline
    Run {
        #[arg(value_enum)]
        pipeline: PipelineKind,

        /// Warehouse URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        warehouse_url: Option<String>,

        /// Rates JSON file to read instead of the configured source
        #[arg(long, value_name = "FILE")]
        rates_file: Option<PathBuf>,
    },
    /// Check the persisted tables of one pipeline against its expectations
    Validate {
        #[arg(value_enum)]
        pipeline: PipelineKind,

        /// Warehouse URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        warehouse_url: Option<String>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Export the tables and reports of one pipeline as CSV
    Export {
        #[arg(value_enum)]
        pipeline: PipelineKind,

        /// Warehouse URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        warehouse_url: Option<String>,

        /// Output directory (overrides config file)
        #[arg(short, long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

const EXIT_STAGE_FAILURE: u8 = 1;
const EXIT_GATE_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_STAGE_FAILURE)
        }
    }
}

fn init_logging(level: &str, format: OutputFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("starpipe={level}").into());

    // stdout carries command output, logs go to stderr
    match format {
        OutputFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        OutputFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = &cli.config {
        info!("Configuration loaded from: {}", path.display());
    }

    match cli.command {
        Command::Run {
            pipeline: kind,
            warehouse_url,
            rates_file,
        } => {
            override_warehouse(&mut config, kind, warehouse_url);
            if let Some(path) = rates_file {
                config.rates.rates_file = Some(path.clone());
                config.transactions.rates_file = path;
            }
            config.validate()?;

            let summary = pipeline::run(kind, &config)
                .await
                .with_context(|| format!("{kind} pipeline failed"))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate {
            pipeline: kind,
            warehouse_url,
            format,
        } => {
            override_warehouse(&mut config, kind, warehouse_url);
            config.validate()?;

            let report = pipeline::validate(kind, &config)
                .await
                .with_context(|| format!("validation of {kind} could not run"))?;
            match format {
                OutputFormat::Text => println!("{report}"),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if report.success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_GATE_FAILURE))
            }
        }
        Command::Export {
            pipeline: kind,
            warehouse_url,
            out_dir,
        } => {
            override_warehouse(&mut config, kind, warehouse_url);
            if let Some(dir) = out_dir {
                config.export.out_dir = dir;
            }
            config.validate()?;

            let written = pipeline::export(kind, &config)
                .await
                .with_context(|| format!("export of {kind} failed"))?;
            for path in written {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            print!("{}", config.render()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn override_warehouse(config: &mut Config, kind: PipelineKind, url: Option<String>) {
    if let Some(url) = url {
        info!("Using warehouse: {}", url);
        kind.warehouse_mut(config).url = url;
    }
}
