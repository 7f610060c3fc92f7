//! Dataloader - bulk CSV ingestion into PostgreSQL/Citus

use anyhow::Result;
use clap::{Parser, Subcommand};
use dataloader::config::{LoaderConfig, PipelineMode, TableName};
use dataloader::fetch::{Fetcher, HttpFetcher, LocalFetcher};
use dataloader::loader::BulkLoader;
use dataloader::pipeline::{FailurePolicy, Pipeline};
use dataloader::IngestError;
use dataloader_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dataloader")]
#[command(author, version, about = "Stream NYC taxi trip CSVs into a PostgreSQL/Citus table")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// What to do when a single file fails to load (default: abort for
    /// remote, continue for local)
    #[arg(long, value_enum, global = true)]
    on_error: Option<FailurePolicy>,

    /// Target table, optionally schema-qualified
    #[arg(long, global = true)]
    table: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Download the dataset archive, unpack it, and load every CSV inside
    Remote {
        /// Dataset URL (overrides DATALOADER_DATA_URL)
        #[arg(long)]
        url: Option<String>,
    },

    /// Load CSV files already present in a local directory
    Local {
        /// Directory to scan (overrides DATALOADER_DATA_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// File name glob (overrides DATALOADER_FILE_PATTERN)
        #[arg(long)]
        pattern: Option<String>,
    },
}

impl Mode {
    fn pipeline_mode(&self) -> PipelineMode {
        match self {
            Mode::Remote { .. } => PipelineMode::Remote,
            Mode::Local { .. } => PipelineMode::Local,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let mut log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("dataloader")
        .filter_directives("sqlx=warn,reqwest=info,hyper=info")
        .build()
        .merge_env()?;

    // Resolved before logging so a bad configuration never touches the filesystem.
    let prepared = resolve_config(&cli).and_then(|config| {
        let source = Source::for_config(&config)?;
        Ok((config, source))
    });
    if prepared.is_err() {
        log_config.output = LogOutput::Console;
    }
    let _log_guard = init_logging(&log_config)?;

    let (config, source) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(e.exit_code()));
        },
    };
    let policy = cli.on_error.unwrap_or_else(|| FailurePolicy::default_for(config.mode));

    info!(
        mode = %config.mode,
        host = %config.db.host,
        port = config.db.port,
        database = %config.db.database,
        table = %config.table,
        policy = ?policy,
        "Starting ingestion"
    );

    let loader = BulkLoader::new(config.db.clone(), config.table.clone());
    let outcome = match source {
        Source::Remote(fetcher) => run(fetcher, loader, policy).await,
        Source::Local(fetcher) => run(fetcher, loader, policy).await,
    };

    // Failures were already logged by the pipeline.
    let code = match outcome {
        Ok(code) => code,
        Err(e) => e.exit_code(),
    };
    Ok(ExitCode::from(code))
}

/// Fetcher for the selected mode, validated before any I/O
enum Source {
    Remote(HttpFetcher),
    Local(LocalFetcher),
}

impl Source {
    fn for_config(config: &LoaderConfig) -> dataloader::Result<Self> {
        match config.mode {
            PipelineMode::Remote => Ok(Source::Remote(HttpFetcher::new(&config.data_url)?)),
            PipelineMode::Local => Ok(Source::Local(LocalFetcher::new(&config.data_dir, &config.file_pattern)?)),
        }
    }
}

fn resolve_config(cli: &Cli) -> dataloader::Result<LoaderConfig> {
    let mut config = LoaderConfig::from_env(cli.mode.pipeline_mode())?;

    if let Some(table) = &cli.table {
        config.table = TableName::parse(table)?;
    }

    match &cli.mode {
        Mode::Remote { url } => {
            if let Some(url) = url {
                config.data_url = url.clone();
            }
        },
        Mode::Local { dir, pattern } => {
            if let Some(dir) = dir {
                config.data_dir = dir.clone();
            }
            if let Some(pattern) = pattern {
                config.file_pattern = pattern.clone();
            }
        },
    }

    Ok(config)
}

async fn run<F: Fetcher>(fetcher: F, loader: BulkLoader, policy: FailurePolicy) -> Result<u8, IngestError> {
    let report = Pipeline::new(fetcher, loader, policy).run().await?;
    Ok(report.exit_code())
}
