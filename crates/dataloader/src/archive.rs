//! Archive unpacking
//!
//! Extracts every entry of a downloaded archive into a directory and returns
//! the CSV files it produced, sorted by path.
//!
//! # Supported Formats
//!
//! - **Zip** (.zip): using the zip crate
//! - **Tar.gz** (.tar.gz, .tgz): gzip + tar
//!
//! Entries are streamed to disk one at a time; an archive is never held in
//! memory.

use crate::error::{IngestError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Extension (case-insensitive) of files handed to the loader
pub const DATA_FILE_EXTENSION: &str = "csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the file name, or `None` if it is not an archive
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

/// Whether `path` names a CSV data file
pub fn is_data_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(DATA_FILE_EXTENSION))
        .unwrap_or(false)
}

/// Unpack `archive` into `dest` on the blocking pool
pub async fn unpack(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let archive_path = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_blocking(&archive_path, &dest))
        .await
        .map_err(|e| IngestError::archive(archive, e))?
}

/// Extract all entries of `archive` into `dest` and return the CSV files.
///
/// Fails with `Archive` when the archive is corrupt, when an entry would
/// escape `dest`, or when no CSV file was extracted.
pub fn unpack_blocking(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let format = ArchiveFormat::detect(archive)
        .ok_or_else(|| IngestError::archive(archive, "unrecognised archive format"))?;

    info!(archive = %archive.display(), dest = %dest.display(), "Extracting archive");

    std::fs::create_dir_all(dest).map_err(|e| IngestError::archive(archive, e))?;
    let file = File::open(archive).map_err(|e| IngestError::archive(archive, e))?;

    let mut extracted = match format {
        ArchiveFormat::Zip => extract_zip(archive, BufReader::new(file), dest)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive, BufReader::new(file), dest)?,
    };

    extracted.retain(|p| is_data_file(p));
    extracted.sort();
    extracted.dedup();

    if extracted.is_empty() {
        return Err(IngestError::archive(archive, "no matching files found"));
    }

    info!(count = extracted.len(), "Found CSV file(s) in archive");
    Ok(extracted)
}

fn extract_zip(archive: &Path, reader: BufReader<File>, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut zip = zip::ZipArchive::new(reader).map_err(|e| IngestError::archive(archive, e))?;
    let mut extracted = Vec::with_capacity(zip.len());

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| IngestError::archive(archive, format!("entry {}: {}", i, e)))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            IngestError::archive(archive, format!("entry '{}' escapes extraction directory", entry.name()))
        })?;
        let target = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| IngestError::archive(archive, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::archive(archive, e))?;
        }
        let mut out = File::create(&target).map_err(|e| IngestError::archive(archive, e))?;
        let bytes = std::io::copy(&mut entry, &mut out)
            .map_err(|e| IngestError::archive(archive, format!("{}: {}", relative.display(), e)))?;

        debug!(entry = %relative.display(), bytes, "Extracted");
        extracted.push(target);
    }

    Ok(extracted)
}

fn extract_tar_gz(archive: &Path, reader: BufReader<File>, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut tar = tar::Archive::new(GzDecoder::new(reader));
    let mut extracted = Vec::new();

    let entries = tar.entries().map_err(|e| IngestError::archive(archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| IngestError::archive(archive, e))?;
        let relative = entry
            .path()
            .map_err(|e| IngestError::archive(archive, e))?
            .into_owned();

        // unpack_in strips root and prefix components, so absolute names
        // would be extracted somewhere other than `dest.join(relative)`.
        if !is_contained(&relative) {
            return Err(IngestError::archive(
                archive,
                format!("entry '{}' escapes extraction directory", relative.display()),
            ));
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| IngestError::archive(archive, format!("{}: {}", relative.display(), e)))?;
        if !unpacked {
            return Err(IngestError::archive(
                archive,
                format!("entry '{}' escapes extraction directory", relative.display()),
            ));
        }

        if entry.header().entry_type().is_file() {
            debug!(entry = %relative.display(), "Extracted");
            extracted.push(dest.join(relative));
        }
    }

    Ok(extracted)
}

/// Relative path made only of normal components
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
