//! Error types.
//!
//! Only the run-level `IngestError` is fatal. Upstream `FetchError`s are
//! absorbed by the adapters and turned into null fields.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::HourKey;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StationListError {
    #[error("Failed to read station list {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Station list is empty: {0}")]
    Empty(PathBuf),
}

/// Upstream request failure. Never fatal for a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("HTTP 404 not found")]
    NotFound,

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Empty payload")]
    Empty,
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to open checkpoint {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append {hour} to checkpoint {path}: {source}")]
    Append {
        path: PathBuf,
        hour: HourKey,
        source: std::io::Error,
    },

    #[error("Failed to record completion of {date} in checkpoint {path}: {source}")]
    AppendDay {
        path: PathBuf,
        date: chrono::NaiveDate,
        source: std::io::Error,
    },

    #[error("Failed to remove finished checkpoint {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write temp file for {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize record for station {station_id}: {source}")]
    Serialize {
        station_id: String,
        source: serde_json::Error,
    },

    #[error("Failed to publish {path}: {source}")]
    Rename {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Nothing to archive for {0}")]
    NoFiles(String),

    #[error("Archive I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Conditions that abort a run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stations(#[from] StationListError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Failed to read hour file {path}: {source}")]
    ReadOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid date range: {0}")]
    InvalidRange(String),
}
