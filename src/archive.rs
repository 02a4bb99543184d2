//! Day and month bundles of hour files.
//!
//! A bundle is `{product}_{YYYYMMDD}.tar.gz` (day) or
//! `{product}_{YYYYMM}.tar.gz` (month) in the year directory. The archive is
//! written through a temp file and renamed into place; only once that
//! succeeds, and the directory entry is synced, are the original hour files
//! removed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::error::ArchiveError;
use crate::output::{self, OutputStore};

pub trait Archiver {
    /// Bundles `files` into `{dest_dir}/{label}.tar.gz` and returns its path.
    /// Must not touch `files` themselves.
    fn bundle(&self, label: &str, dest_dir: &Path, files: &[PathBuf]) -> Result<PathBuf, ArchiveError>;
}

/// Gzip-compressed tarball, entries stored under their bare file names.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzArchiver;

impl Archiver for TarGzArchiver {
    fn bundle(&self, label: &str, dest_dir: &Path, files: &[PathBuf]) -> Result<PathBuf, ArchiveError> {
        let target = dest_dir.join(format!("{}.tar.gz", label));
        let tmp = NamedTempFile::new_in(dest_dir).map_err(io_error(dest_dir))?;
        let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for file in files {
            let name = file.file_name().ok_or_else(|| ArchiveError::Io {
                path: file.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
            })?;
            builder.append_path_with_name(file, name).map_err(io_error(file))?;
        }
        let encoder = builder.into_inner().map_err(io_error(&target))?;
        encoder.finish().map_err(io_error(&target))?;
        tmp.as_file().sync_all().map_err(io_error(&target))?;
        tmp.persist(&target).map_err(|e| ArchiveError::Io {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(target)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}

/// Bundles `files` under `label` and deletes them once the bundle exists.
fn bundle_and_remove(
    archiver: &dyn Archiver,
    output: &OutputStore,
    year: i32,
    label: String,
    files: Vec<PathBuf>,
) -> Result<PathBuf, ArchiveError> {
    if files.is_empty() {
        return Err(ArchiveError::NoFiles(label));
    }
    let dest_dir = output.year_dir(year);
    let bundle = archiver.bundle(&label, &dest_dir, &files)?;
    output::sync_dir(&dest_dir).map_err(io_error(&dest_dir))?;
    for file in &files {
        fs::remove_file(file).map_err(|source| ArchiveError::Io {
            path: file.clone(),
            source,
        })?;
    }
    tracing::info!(bundle = %bundle.display(), files = files.len(), "archived hour files");
    Ok(bundle)
}

fn day_label(output: &OutputStore, date: NaiveDate) -> String {
    format!("{}_{}", output.product(), date.format("%Y%m%d"))
}

/// Where `archive_day` puts the bundle for `date`.
pub fn day_bundle_path(output: &OutputStore, date: NaiveDate) -> PathBuf {
    output
        .year_dir(date.year())
        .join(format!("{}.tar.gz", day_label(output, date)))
}

pub fn archive_day(archiver: &dyn Archiver, output: &OutputStore, date: NaiveDate) -> Result<PathBuf, ArchiveError> {
    let label = day_label(output, date);
    bundle_and_remove(archiver, output, date.year(), label, output.day_files(date))
}

pub fn archive_month(
    archiver: &dyn Archiver,
    output: &OutputStore,
    year: i32,
    month: u32,
) -> Result<PathBuf, ArchiveError> {
    let label = format!("{}_{:04}{:02}", output.product(), year, month);
    bundle_and_remove(archiver, output, year, label, output.month_files(year, month))
}
