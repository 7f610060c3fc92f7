//! Bulk loading via `COPY ... FROM STDIN`
//!
//! Each file gets its own connection in auto-commit mode, so every file is
//! its own transaction. The file is streamed to the server in bounded chunks;
//! the server parses the CSV and skips the header row.

use crate::config::{DbConfig, TableName};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::path::Path;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, info, instrument, warn};

/// Read buffer used while streaming a file into COPY
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Destination for data files.
///
/// [`BulkLoader`] is the production implementation; the orchestrator only
/// depends on this trait.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Target table, for logging
    fn table(&self) -> &TableName;

    /// Load one file, returning the number of rows written
    async fn load(&self, file: &Path) -> Result<u64>;
}

/// Per-file load state.
///
/// `Pending -> Loading -> Loaded | Failed`. Terminal states never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Loading,
    Loaded { rows: u64 },
    Failed { reason: String },
}

impl FileState {
    pub fn begin(self) -> Self {
        match self {
            FileState::Pending => FileState::Loading,
            other => other,
        }
    }

    pub fn settle(self, result: &Result<u64>) -> Self {
        match (self, result) {
            (FileState::Loading, Ok(rows)) => FileState::Loaded { rows: *rows },
            (FileState::Loading, Err(e)) => FileState::Failed {
                reason: e.to_string(),
            },
            (other, _) => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Loaded { .. } | FileState::Failed { .. })
    }
}

/// Streams CSV files into a table with the PostgreSQL COPY protocol
#[derive(Debug, Clone)]
pub struct BulkLoader {
    db: DbConfig,
    table: TableName,
}

impl BulkLoader {
    pub fn new(db: DbConfig, table: TableName) -> Self {
        Self { db, table }
    }

    pub fn copy_statement(&self) -> String {
        format!("COPY {} FROM STDIN WITH (FORMAT csv, HEADER true)", self.table.quoted())
    }
}

#[async_trait]
impl TableSink for BulkLoader {
    fn table(&self) -> &TableName {
        &self.table
    }

    #[instrument(skip(self, file), fields(table = %self.table, file = %file.display()))]
    async fn load(&self, file: &Path) -> Result<u64> {
        let reader = tokio::fs::File::open(file)
            .await
            .map_err(|e| IngestError::load(file, sqlx::Error::Io(e)))?;

        let mut conn = PgConnection::connect_with(&self.db.connect_options())
            .await
            .map_err(|e| IngestError::load(file, e))?;
        debug!(host = %self.db.host, database = %self.db.database, "Connected");

        let copied = copy_from(&mut conn, &self.copy_statement(), reader).await;

        // Closed on every path before the outcome is reported.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close connection cleanly");
        }

        let rows = copied.map_err(|e| IngestError::load(file, e))?;
        info!(rows, "Loaded file");
        Ok(rows)
    }
}

async fn copy_from<R>(conn: &mut PgConnection, statement: &str, source: R) -> sqlx::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut copy = conn.copy_in_raw(statement).await?;

    let streamed = copy
        .read_from(BufReader::with_capacity(COPY_CHUNK_SIZE, source))
        .await
        .map(|_| ());
    if let Err(e) = streamed {
        if let Err(abort_err) = copy.abort(e.to_string()).await {
            debug!(error = %abort_err, "COPY abort reported an error");
        }
        return Err(e);
    }

    copy.finish().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn db() -> DbConfig {
        DbConfig {
            host: "127.0.0.1".into(),
            port: 1,
            database: "taxi".into(),
            user: "loader".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn test_copy_statement_quotes_table() {
        let loader = BulkLoader::new(db(), TableName::parse("public.yellow_tripdata").unwrap());
        assert_eq!(
            loader.copy_statement(),
            "COPY \"public\".\"yellow_tripdata\" FROM STDIN WITH (FORMAT csv, HEADER true)"
        );
    }

    #[test]
    fn test_state_transitions() {
        let state = FileState::Pending.begin();
        assert_eq!(state, FileState::Loading);
        assert!(!state.is_terminal());

        let loaded = state.settle(&Ok(3));
        assert_eq!(loaded, FileState::Loaded { rows: 3 });
        assert!(loaded.is_terminal());
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let failed = FileState::Loading.settle(&Err(IngestError::config("boom")));
        assert!(matches!(failed, FileState::Failed { .. }));

        assert_eq!(failed.clone().begin(), failed);
        assert_eq!(failed.clone().settle(&Ok(10)), failed);
        assert_eq!(FileState::Loaded { rows: 1 }.settle(&Ok(5)), FileState::Loaded { rows: 1 });
    }

    #[test]
    fn test_settle_requires_loading() {
        assert_eq!(FileState::Pending.settle(&Ok(1)), FileState::Pending);
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_connecting() {
        let loader = BulkLoader::new(db(), TableName::parse("trips").unwrap());
        let err = loader.load(Path::new("/nonexistent/trips.csv")).await.unwrap_err();

        match err {
            IngestError::Load { file, source } => {
                assert_eq!(file, Path::new("/nonexistent/trips.csv"));
                assert!(matches!(source, sqlx::Error::Io(_)));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
