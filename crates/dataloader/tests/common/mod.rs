//! Shared helpers for dataloader integration tests
//!
//! PostgreSQL-backed tests start a throwaway container with testcontainers and
//! are marked `#[ignore = "requires Docker"]`; run them with
//! `cargo test -- --ignored`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use dataloader::config::{DbConfig, TableName};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// Columns of the trip table used by the fixtures
pub const TRIP_TABLE_DDL: &str = "CREATE TABLE yellow_tripdata (
    vendor_id INTEGER NOT NULL,
    pickup_datetime TIMESTAMP NOT NULL,
    passenger_count INTEGER,
    trip_distance DOUBLE PRECISION
)";

pub const TRIP_CSV_HEADER: &str = "vendor_id,pickup_datetime,passenger_count,trip_distance\n";

/// PostgreSQL container with the trip table created
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    db: DbConfig,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let db = DbConfig {
            host: host.to_string(),
            port,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        };

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(db.connect_options().application_name("dataloader-tests"))
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query(TRIP_TABLE_DDL)
            .execute(&pool)
            .await
            .context("Failed to create trip table")?;

        Ok(Self {
            _container: container,
            pool,
            db,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn db(&self) -> DbConfig {
        self.db.clone()
    }

    pub fn table(&self) -> TableName {
        TableName::parse("yellow_tripdata").expect("valid table name")
    }

    pub async fn row_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM yellow_tripdata")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Loader sessions still open on the server
    pub async fn open_loader_sessions(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pg_stat_activity WHERE application_name = 'dataloader'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// `rows` well-formed trip rows with a header
pub fn trip_csv(rows: usize) -> String {
    let mut csv = String::from(TRIP_CSV_HEADER);
    for i in 0..rows {
        csv.push_str(&format!("{},2015-01-15 19:05:{:02},1,{}.5\n", 1 + i % 2, i % 60, i));
    }
    csv
}

/// Zip archive bytes holding the given entries
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in entries {
        zip.start_file(*name, options).expect("start zip entry");
        zip.write_all(body.as_bytes()).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

pub fn write_file(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).expect("write fixture");
}

/// Number of entries left directly under `root`
pub fn entries_in(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dataloader=debug,sqlx=warn,testcontainers=info")),
        )
        .with_test_writer()
        .try_init();
}
