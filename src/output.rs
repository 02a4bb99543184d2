//! Year-partitioned hour files.
//!
//! Layout: `{output_dir}/{YYYY}/{product}_{YYYYMMDD}T{HH}Z.jsonl`, one JSON
//! object per line, one line per station in registry order.
//!
//! Files are written to a temp file in the target directory, synced, then
//! renamed over the final name. Readers see either the previous complete
//! file or the new complete file, never a partial one, and rewriting an
//! hour simply replaces it. The directory is synced after the rename so the
//! new name is durable before the hour is checkpointed.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use crate::error::{IngestError, PublishError};
use crate::model::{HourKey, ObservationRecord};

/// Flushes directory entries (renames, creations) of `dir` to disk.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    product: String,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>, product: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            product: product.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn year_dir(&self, year: i32) -> PathBuf {
        self.root.join(format!("{:04}", year))
    }

    pub fn hour_path(&self, hour: HourKey) -> PathBuf {
        self.year_dir(hour.year())
            .join(format!("{}_{}Z.jsonl", self.product, hour.compact()))
    }

    /// Atomically writes the hour file for `hour`.
    pub fn publish(&self, hour: HourKey, records: &[ObservationRecord]) -> Result<PathBuf, PublishError> {
        let dir = self.year_dir(hour.year());
        let path = self.hour_path(hour);
        fs::create_dir_all(&dir).map_err(|source| PublishError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let write_err = |source| PublishError::Write {
            path: path.clone(),
            source,
        };
        let tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            for record in records {
                serde_json::to_writer(&mut writer, record).map_err(|source| PublishError::Serialize {
                    station_id: record.station_id.clone(),
                    source,
                })?;
                writer.write_all(b"\n").map_err(write_err)?;
            }
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;

        tmp.persist(&path).map_err(|e| PublishError::Rename {
            path: path.clone(),
            source: e.error,
        })?;
        sync_dir(&dir).map_err(|source| PublishError::Rename {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), records = records.len(), "published hour file");
        Ok(path)
    }

    /// Reads back a published hour file. `Ok(None)` if the hour has no file.
    pub fn read_hour(&self, hour: HourKey) -> Result<Option<Vec<ObservationRecord>>, IngestError> {
        let path = self.hour_path(hour);
        let read_err = |source| IngestError::ReadOutput {
            path: path.clone(),
            source,
        };
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_err(e)),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(read_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| read_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            records.push(record);
        }
        Ok(Some(records))
    }

    /// Existing hour files of `date`, in hour order.
    pub fn day_files(&self, date: NaiveDate) -> Vec<PathBuf> {
        HourKey::range_inclusive(HourKey::first_of_day(date), HourKey::last_of_day(date))
            .map(|hour| self.hour_path(hour))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Existing hour files of a calendar month, in hour order.
    pub fn month_files(&self, year: i32, month: u32) -> Vec<PathBuf> {
        let prefix = format!("{}_{:04}{:02}", self.product, year, month);
        let Ok(entries) = fs::read_dir(self.year_dir(year)) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with("Z.jsonl"))
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldName, FieldValue};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(station: &str, hour: HourKey, tide: Option<f64>) -> ObservationRecord {
        let mut record = ObservationRecord::empty(station, hour);
        record
            .fields
            .insert(FieldName::TideHeightFt, tide.map(FieldValue::Number));
        record
    }

    #[test]
    fn test_hour_path_layout() {
        let store = OutputStore::new("/data/out", "marine_obs");
        let hour = HourKey::new(2024, 5, 1, 7).unwrap();
        assert_eq!(
            store.hour_path(hour),
            PathBuf::from("/data/out/2024/marine_obs_20240501T07Z.jsonl")
        );
    }

    #[test]
    fn test_publish_then_read_back() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "marine_obs");
        let hour = HourKey::new(2024, 5, 1, 12).unwrap();
        let records = vec![record("S1", hour, Some(5.2)), record("S2", hour, None)];

        let path = store.publish(hour, &records).unwrap();

        assert!(path.is_file());
        assert_eq!(store.read_hour(hour).unwrap(), Some(records));
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().starts_with(r#"{"station_id":"S1""#));
    }

    #[test]
    fn test_republish_replaces_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "marine_obs");
        let hour = HourKey::new(2024, 5, 1, 12).unwrap();

        store.publish(hour, &[record("S1", hour, Some(1.0)), record("S2", hour, None)]).unwrap();
        store.publish(hour, &[record("S1", hour, Some(2.0))]).unwrap();

        let read = store.read_hour(hour).unwrap().unwrap();
        assert_eq!(read, vec![record("S1", hour, Some(2.0))]);
        let entries = fs::read_dir(store.year_dir(2024)).unwrap().count();
        assert_eq!(entries, 1, "temp files must not be left behind");
    }

    #[test]
    fn test_missing_hour_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "marine_obs");
        assert_eq!(store.read_hour(HourKey::new(2024, 5, 1, 0).unwrap()).unwrap(), None);
    }

    #[test]
    fn test_day_and_month_file_listing() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "marine_obs");
        for (day, hour) in [(1, 0), (1, 23), (2, 5)] {
            let key = HourKey::new(2024, 5, day, hour).unwrap();
            store.publish(key, &[record("S1", key, None)]).unwrap();
        }
        let june = HourKey::new(2024, 6, 1, 0).unwrap();
        store.publish(june, &[record("S1", june, None)]).unwrap();

        let day = store.day_files(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(day.len(), 2);
        assert!(day[0] < day[1]);

        assert_eq!(store.month_files(2024, 5).len(), 3);
        assert_eq!(store.month_files(2024, 6).len(), 1);
        assert!(store.month_files(2023, 1).is_empty());
    }

    #[test]
    fn test_sync_dir_after_publish() {
        let dir = TempDir::new().unwrap();
        let store = OutputStore::new(dir.path(), "marine_obs");
        let hour = HourKey::new(2024, 5, 1, 7).unwrap();
        store.publish(hour, &[ObservationRecord::empty("S1", hour)]).unwrap();

        assert!(sync_dir(&store.year_dir(2024)).is_ok());
        #[cfg(unix)]
        assert!(sync_dir(&dir.path().join("no-such-year")).is_err());
    }
}
