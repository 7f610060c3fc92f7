//! Pipeline orchestration
//!
//! Sequences fetch -> unpack -> load for every data file in lexicographic
//! order, owns the working directory for the run, and classifies the result.
//!
//! Failure handling depends on [`FailurePolicy`]: with `Abort` the first
//! failed file ends the run with an `Ingestion` error, with `Continue` the
//! failure is recorded and the next file is loaded. Fetch and unpack
//! failures always end the run.

use crate::archive::{self, ArchiveFormat};
use crate::config::PipelineMode;
use crate::error::{CleanupWarning, IngestError, Result, Stage};
use crate::fetch::Fetcher;
use crate::loader::{FileState, TableSink};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info, instrument, warn};

/// Prefix of the per-run working directory under the temp root
pub const WORKDIR_PREFIX: &str = "nyc_taxi_ingest_";

/// What to do when a single file fails to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Stop the run at the first failed file
    Abort,
    /// Record the failure and move on to the next file
    Continue,
}

impl FailurePolicy {
    /// Remote runs abort; local batch runs are best-effort
    pub fn default_for(mode: PipelineMode) -> Self {
        match mode {
            PipelineMode::Remote => FailurePolicy::Abort,
            PipelineMode::Local => FailurePolicy::Continue,
        }
    }
}

/// Ephemeral directory owned by one run.
///
/// Removed by [`WorkingDir::cleanup`], or on drop if cleanup was never
/// reached. Removal errors are logged, never returned as failures.
#[derive(Debug)]
pub struct WorkingDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl WorkingDir {
    pub fn create_in(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        info!(path = %path.display(), "Using temporary directory");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory. Returns the warning that was logged, if any.
    pub fn cleanup(mut self) -> Option<CleanupWarning> {
        self.remove()
    }

    fn remove(&mut self) -> Option<CleanupWarning> {
        let dir = self.dir.take()?;
        info!(path = %self.path.display(), "Cleaning up temporary directory");
        match dir.close() {
            Ok(()) => None,
            Err(source) => {
                let warning = CleanupWarning {
                    path: self.path.clone(),
                    source,
                };
                warn!(warning = %warning, "Cleanup failed");
                Some(warning)
            },
        }
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Final state of one data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub state: FileState,
}

/// Overall classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// No data files were found
    NothingToDo,
    PartialFailure,
    TotalFailure,
}

#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub files: Vec<FileOutcome>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        let failed = self.failed().count();
        if self.files.is_empty() {
            RunOutcome::NothingToDo
        } else if failed == 0 {
            RunOutcome::Succeeded
        } else if failed == self.files.len() {
            RunOutcome::TotalFailure
        } else {
            RunOutcome::PartialFailure
        }
    }

    pub fn loaded(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files
            .iter()
            .filter(|f| matches!(f.state, FileState::Loaded { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files
            .iter()
            .filter(|f| matches!(f.state, FileState::Failed { .. }))
    }

    pub fn total_rows(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.state {
                FileState::Loaded { rows } => rows,
                _ => 0,
            })
            .sum()
    }

    /// 0 on success or nothing to do, 1 on any failure
    pub fn exit_code(&self) -> u8 {
        match self.outcome() {
            RunOutcome::Succeeded | RunOutcome::NothingToDo => 0,
            RunOutcome::PartialFailure | RunOutcome::TotalFailure => 1,
        }
    }
}

/// One ingestion run: a source, a sink, and a failure policy
pub struct Pipeline<F, S> {
    fetcher: F,
    sink: S,
    policy: FailurePolicy,
    staging_root: PathBuf,
}

impl<F: Fetcher, S: TableSink> Pipeline<F, S> {
    pub fn new(fetcher: F, sink: S, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            sink,
            policy,
            staging_root: std::env::temp_dir(),
        }
    }

    /// Create working directories under `root` instead of the system temp dir
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[instrument(skip(self), fields(source = %self.fetcher.locator(), table = %self.sink.table()))]
    pub async fn run(&self) -> Result<RunReport> {
        let workdir = if self.fetcher.needs_staging() {
            match WorkingDir::create_in(&self.staging_root) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    let err = IngestError::ingestion(Stage::Prepare, e);
                    error!(error = %err, root = %self.staging_root.display(), "Ingestion process failed");
                    return Err(err);
                },
            }
        } else {
            None
        };

        let result = self.run_stages(workdir.as_ref().map(WorkingDir::path)).await;

        if let Some(workdir) = workdir {
            workdir.cleanup();
        }

        match &result {
            Ok(report) => log_summary(report),
            Err(e) => error!(error = %e, "Ingestion process failed"),
        }
        result
    }

    async fn run_stages(&self, staging: Option<&Path>) -> Result<RunReport> {
        let fetched = self
            .fetcher
            .fetch(staging)
            .await
            .map_err(|e| IngestError::ingestion(Stage::Fetch, e))?;

        let files = resolve_data_files(fetched, staging)
            .await
            .map_err(|e| IngestError::ingestion(Stage::Unpack, e))?;

        if files.is_empty() {
            info!("No data files found; nothing to do");
            return Ok(RunReport::default());
        }

        info!(count = files.len(), policy = ?self.policy, "Loading data files");
        let mut report = RunReport::default();

        for file in files {
            let state = FileState::Pending.begin();
            info!(file = %file.display(), table = %self.sink.table(), "Loading");

            let result = self.sink.load(&file).await;
            let state = state.settle(&result);

            match result {
                Ok(rows) => {
                    info!(file = %file.display(), rows, "Successfully loaded");
                    report.files.push(FileOutcome { file, state });
                },
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Failed to load");
                    report.files.push(FileOutcome { file, state });
                    if self.policy == FailurePolicy::Abort {
                        return Err(IngestError::ingestion(Stage::Load, e));
                    }
                },
            }
        }

        Ok(report)
    }
}

/// Unpack fetched archives into `staging` and collect the data files, sorted.
///
/// Without a staging directory fetched paths are used as-is.
async fn resolve_data_files(fetched: Vec<PathBuf>, staging: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in fetched {
        match (ArchiveFormat::detect(&path), staging) {
            (Some(_), Some(staging)) => {
                let stem = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "archive".to_string());
                let dest = staging.join(format!("{}.d", stem));
                files.extend(archive::unpack(&path, &dest).await?);
            },
            _ => files.push(path),
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn log_summary(report: &RunReport) {
    let loaded = report.loaded().count();
    match report.outcome() {
        RunOutcome::NothingToDo => info!("Ingestion complete; no files to load"),
        RunOutcome::Succeeded => {
            info!(files = loaded, rows = report.total_rows(), "All files ingested successfully")
        },
        RunOutcome::PartialFailure | RunOutcome::TotalFailure => {
            for failed in report.failed() {
                if let FileState::Failed { reason } = &failed.state {
                    error!(file = %failed.file.display(), reason = %reason, "File not loaded");
                }
            }
            error!(
                loaded,
                failed = report.failed().count(),
                outcome = ?report.outcome(),
                "Ingestion finished with failures"
            );
        },
    }
}
