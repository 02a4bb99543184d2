//! Station registry for the marine observation service.
//!
//! Loaded once at startup from a pipe-delimited list:
//!
//! ```text
//! # id|name|lat|lon|source|expected_fields(csv)
//! 8452660|Newport, RI|41.5043|-71.3261|NOAA|tide_height_ft,wind_spd_kts,wind_dir_deg
//! ```
//!
//! This is the single source of truth for which stations exist and which
//! fields each is expected to report. Stations are immutable after load.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::StationListError;
use crate::ingest;
use crate::model::{FieldName, FieldSet, Source};

/// Metadata for a single monitoring station.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    /// Upstream station identifier; alphanumeric plus hyphen.
    pub id: String,
    pub name: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    pub source: Source,
    /// Fields this station is expected to populate. Never contains
    /// astronomical fields; those are station-independent.
    pub expected_fields: FieldSet,
}

impl Station {
    pub fn has_valid_id(&self) -> bool {
        is_valid_station_id(&self.id)
    }

    /// Expected fields the station's source never supplies. These can only
    /// ever be null and show up as missing in every verification.
    pub fn unsupplied_fields(&self) -> Vec<FieldName> {
        let owned = ingest::owned_fields(self.source);
        self.expected_fields
            .iter()
            .copied()
            .filter(|f| !owned.contains(f))
            .collect()
    }
}

/// Station ids end up in URLs and output lines: alphanumeric plus hyphen only.
pub fn is_valid_station_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Ordered, immutable set of stations.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<Station>,
}

impl StationRegistry {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    /// Reads and parses the station list at `path`.
    pub fn load(path: &Path) -> Result<Self, StationListError> {
        let contents = fs::read_to_string(path).map_err(|source| StationListError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::parse(&contents);
        if registry.is_empty() {
            return Err(StationListError::Empty(path.to_path_buf()));
        }
        Ok(registry)
    }

    /// Parses station list text. Lines that cannot be used are logged and
    /// skipped; one bad station never prevents the others from loading.
    ///
    /// Ids failing format validation are kept so the per-hour collection can
    /// report and exclude them, matching how the rest of the run treats them.
    pub fn parse(contents: &str) -> Self {
        let mut stations = Vec::new();
        let mut seen = HashSet::new();

        for (index, raw) in contents.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_station_line(line) {
                Ok(station) => {
                    if !seen.insert(station.id.clone()) {
                        tracing::warn!(line = line_no, station = %station.id, "duplicate station id, keeping first entry");
                        continue;
                    }
                    let unsupplied = station.unsupplied_fields();
                    if !unsupplied.is_empty() {
                        let names: Vec<&str> = unsupplied.iter().map(FieldName::as_str).collect();
                        tracing::warn!(
                            line = line_no,
                            station = %station.id,
                            source = %station.source,
                            fields = %names.join(","),
                            "expected fields the source never supplies; they will always be null"
                        );
                    }
                    stations.push(station);
                }
                Err(LineError::UnknownSource(msg)) => {
                    tracing::error!(line = line_no, "{}, station skipped", msg);
                }
                Err(LineError::Malformed(msg)) => {
                    tracing::warn!(line = line_no, "malformed station entry: {}", msg);
                }
            }
        }

        Self { stations }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    /// Sources with at least one registered station.
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.stations.iter().map(|s| s.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

enum LineError {
    UnknownSource(String),
    Malformed(String),
}

fn parse_station_line(line: &str) -> Result<Station, LineError> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    if parts.len() != 6 {
        return Err(LineError::Malformed(format!(
            "expected 6 '|'-separated columns, got {}",
            parts.len()
        )));
    }

    let id = parts[0].to_string();
    let name = parts[1].to_string();
    let latitude: f64 = parts[2]
        .parse()
        .map_err(|_| LineError::Malformed(format!("{}: bad latitude '{}'", id, parts[2])))?;
    let longitude: f64 = parts[3]
        .parse()
        .map_err(|_| LineError::Malformed(format!("{}: bad longitude '{}'", id, parts[3])))?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(LineError::Malformed(format!("{}: coordinates out of range", id)));
    }

    let source: Source = parts[4]
        .parse()
        .map_err(|e: String| LineError::UnknownSource(format!("{}: {}", id, e)))?;

    let mut expected_fields = FieldSet::new();
    for token in parts[5].split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let field: FieldName = token
            .parse()
            .map_err(|e: String| LineError::Malformed(format!("{}: {}", id, e)))?;
        if field.is_astronomical() {
            // always emitted regardless of station
            continue;
        }
        expected_fields.insert(field);
    }

    Ok(Station {
        id,
        name,
        latitude,
        longitude,
        source,
        expected_fields,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
