//! Durable record of completed hours for a job.
//!
//! One plain-text file per job, `{checkpoint_dir}/{job_id}.ckpt`, holding
//! one `YYYYMMDDTHH` line per completed hour. The file is only ever
//! appended to and each append is fsynced before `mark_done` returns, so an
//! hour is never reported done before its line is on disk. A torn last
//! line after a crash is ignored on load; that hour is simply redone.
//!
//! A `day YYYYMMDD` line records that the day completion step (verify and
//! archive) has run for that date, so a resumed job can tell a day whose
//! last hour is done but whose completion step never ran.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::CheckpointError;
use crate::model::HourKey;

/// Job id of a backfill over `start..=end`.
pub fn backfill_job_id(product: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!("{}_{}_{}", product, start.format("%Y%m%d"), end.format("%Y%m%d"))
}

/// Job id used by realtime mode; never finished, so never removed.
pub const REALTIME_JOB_ID: &str = "realtime";

pub struct CheckpointStore {
    path: PathBuf,
    done: HashSet<HourKey>,
    days: HashSet<NaiveDate>,
    file: File,
}

const DAY_PREFIX: &str = "day ";

fn parse_day_line(line: &str) -> Option<NaiveDate> {
    let raw = line.strip_prefix(DAY_PREFIX)?;
    if raw.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

impl CheckpointStore {
    /// Opens (creating if needed) the checkpoint for `job_id` and loads
    /// every completed hour into memory.
    pub fn open(dir: &Path, job_id: &str) -> Result<Self, CheckpointError> {
        let path = dir.join(format!("{}.ckpt", job_id));
        let open_err = |source| CheckpointError::Open {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(open_err)?;

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(open_err(e)),
        };

        let mut done = HashSet::new();
        let mut days = HashSet::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(date) = parse_day_line(line) {
                days.insert(date);
                continue;
            }
            match line.parse::<HourKey>() {
                Ok(hour) => {
                    done.insert(hour);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), line = number + 1, "ignoring checkpoint line: {}", e);
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        // terminate a torn last line so the next append starts clean
        if !contents.is_empty() && !contents.ends_with('\n') {
            writeln!(file).map_err(open_err)?;
        }

        if !done.is_empty() {
            tracing::info!(job = job_id, completed = done.len(), "resuming from checkpoint");
        }
        Ok(Self { path, done, days, file })
    }

    pub fn is_done(&self, hour: HourKey) -> bool {
        self.done.contains(&hour)
    }

    pub fn completed(&self) -> usize {
        self.done.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `hour` and syncs it to disk. Marking an hour twice is a
    /// no-op.
    pub fn mark_done(&mut self, hour: HourKey) -> Result<(), CheckpointError> {
        if self.done.contains(&hour) {
            return Ok(());
        }
        let append_err = |source| CheckpointError::Append {
            path: self.path.clone(),
            hour,
            source,
        };
        writeln!(self.file, "{}", hour.compact()).map_err(append_err)?;
        self.file.sync_data().map_err(append_err)?;
        self.done.insert(hour);
        Ok(())
    }

    pub fn is_day_settled(&self, date: NaiveDate) -> bool {
        self.days.contains(&date)
    }

    /// Records that the completion step for `date` has run. Synced like
    /// hour lines.
    pub fn mark_day_settled(&mut self, date: NaiveDate) -> Result<(), CheckpointError> {
        if self.days.contains(&date) {
            return Ok(());
        }
        let append_err = |source| CheckpointError::AppendDay {
            path: self.path.clone(),
            date,
            source,
        };
        writeln!(self.file, "{}{}", DAY_PREFIX, date.format("%Y%m%d")).map_err(append_err)?;
        self.file.sync_data().map_err(append_err)?;
        self.days.insert(date);
        Ok(())
    }

    /// Discards the checkpoint of a fully completed job.
    pub fn finish(self) -> Result<(), CheckpointError> {
        let CheckpointStore { path, file, .. } = self;
        drop(file);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Remove { path, source }),
        }
    }
}
