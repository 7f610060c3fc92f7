//! Dataloader
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams NYC yellow taxi trip CSV files into a (Citus-distributed)
//! PostgreSQL table using `COPY ... FROM STDIN`.
//!
//! Two pipelines share the same stages:
//!
//! - **Remote**: download an archive over HTTP into a temporary working
//!   directory, unpack it, load every CSV inside, remove the directory
//! - **Local**: glob a directory for CSV files and load each one
//!
//! # Example
//!
//! ```no_run
//! use dataloader::config::{LoaderConfig, PipelineMode};
//! use dataloader::fetch::HttpFetcher;
//! use dataloader::loader::BulkLoader;
//! use dataloader::pipeline::{FailurePolicy, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::from_env(PipelineMode::Remote)?;
//!     let fetcher = HttpFetcher::new(&config.data_url)?;
//!     let loader = BulkLoader::new(config.db.clone(), config.table.clone());
//!
//!     let report = Pipeline::new(fetcher, loader, FailurePolicy::Abort).run().await?;
//!     println!("loaded {} rows", report.total_rows());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod pipeline;

pub use error::{IngestError, Result};
