//! Source fetchers
//!
//! A [`Fetcher`] turns a source locator into files on local disk:
//!
//! - [`HttpFetcher`] streams one HTTP download into the working directory
//! - [`LocalFetcher`] globs a directory for already-present data files

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use dataloader_common::progress::{create_download_progress, format_bytes};
use futures::StreamExt;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use wax::Glob;

/// Write buffer size for downloads
pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

/// File name used when the URL does not carry a usable one
pub const DEFAULT_DOWNLOAD_NAME: &str = "nyc-yellow-taxi-trip-data.zip";

const KNOWN_DOWNLOAD_SUFFIXES: &[&str] = &[".zip", ".tar.gz", ".tgz", ".csv"];

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// URL or glob this fetcher reads from, for logging
    fn locator(&self) -> String;

    /// Whether `fetch` needs a working directory to stage files in
    fn needs_staging(&self) -> bool;

    /// Produce local files. `staging` is set when `needs_staging` is true.
    async fn fetch(&self, staging: Option<&Path>) -> Result<Vec<PathBuf>>;
}

/// Downloads a single dataset file over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url: Url,
}

impl HttpFetcher {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| IngestError::config(format!("Invalid data URL '{}': {}", url, e)))?;
        let client = Client::builder()
            .user_agent(concat!("dataloader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }

    /// Local file name for the download, taken from the URL when it has a
    /// recognised extension
    pub fn file_name(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| {
                let lower = name.to_lowercase();
                KNOWN_DOWNLOAD_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
            })
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
    }

    /// Stream the response body to `target`; returns the byte count
    pub async fn download_to(&self, target: &Path) -> Result<u64> {
        let locator = self.url.as_str();
        info!(url = locator, target = %target.display(), "Downloading");

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| IngestError::download(locator, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::download(locator, format!("HTTP status {}", status)));
        }

        let progress =
            create_download_progress(response.content_length(), &format!("Downloading {}", self.file_name()));

        let file = tokio::fs::File::create(target)
            .await
            .map_err(|e| IngestError::download(locator, format!("{}: {}", target.display(), e)))?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| IngestError::download(locator, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| IngestError::download(locator, e))?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }
        writer.flush().await.map_err(|e| IngestError::download(locator, e))?;
        progress.finish_and_clear();

        info!(bytes = downloaded, size = %format_bytes(downloaded), "Download completed");
        Ok(downloaded)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn locator(&self) -> String {
        self.url.to_string()
    }

    fn needs_staging(&self) -> bool {
        true
    }

    async fn fetch(&self, staging: Option<&Path>) -> Result<Vec<PathBuf>> {
        let staging = staging
            .ok_or_else(|| IngestError::download(self.url.as_str(), "no working directory to download into"))?;
        let target = staging.join(self.file_name());
        self.download_to(&target).await?;
        Ok(vec![target])
    }
}

/// Finds data files already present in a local directory
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    dir: PathBuf,
    pattern: String,
}

impl LocalFetcher {
    /// Fails with `Configuration` when `pattern` is not a valid glob
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        parse_pattern(&pattern)?;
        Ok(Self {
            dir: dir.into(),
            pattern,
        })
    }
}

fn parse_pattern(pattern: &str) -> Result<Glob<'_>> {
    Glob::new(pattern).map_err(|e| IngestError::config(format!("Invalid file pattern '{}': {}", pattern, e)))
}

#[async_trait]
impl Fetcher for LocalFetcher {
    fn locator(&self) -> String {
        format!("{}/{}", self.dir.display(), self.pattern)
    }

    fn needs_staging(&self) -> bool {
        false
    }

    async fn fetch(&self, _staging: Option<&Path>) -> Result<Vec<PathBuf>> {
        let dir = self.dir.clone();
        let pattern = self.pattern.clone();
        tokio::task::spawn_blocking(move || discover(&dir, &pattern))
            .await
            .map_err(|e| IngestError::download(self.locator(), e))?
    }
}

/// Regular files under `dir` matching `pattern`, sorted by path.
///
/// A missing directory or no matches is an empty result, not an error.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let glob = parse_pattern(pattern)?;

    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Data directory does not exist");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in glob.walk(dir) {
        let entry = entry.map_err(|e| IngestError::download(format!("{}/{}", dir.display(), pattern), e))?;
        let path = entry.path();
        if path.is_file() {
            debug!(file = %path.display(), "Discovered");
            files.push(path.to_path_buf());
        }
    }
    files.sort();

    info!(dir = %dir.display(), pattern, count = files.len(), "Discovered data files");
    Ok(files)
}
