//! Completeness verification of one day of published hour files.
//!
//! Read-only: re-reads the 24 hour files of a day and, per station, counts
//! the records found and how often each expected field was null or absent.
//! Results are logged for the operator; nothing is retried or rewritten.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::Result;
use crate::model::{FieldName, FieldSet, HourKey, ObservationRecord};
use crate::output::OutputStore;
use crate::stations::Station;

pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub station_id: String,
    pub date: NaiveDate,
    pub records_found: usize,
    /// Fields populated in at least one record of the day.
    pub fields_populated: FieldSet,
    /// Per expected field, records where it was null or absent.
    pub missing: BTreeMap<FieldName, usize>,
    /// Populated fields the station does not expect, astronomy excluded.
    pub unexpected: FieldSet,
}

impl VerificationReport {
    fn new(station: &Station, date: NaiveDate) -> Self {
        Self {
            station_id: station.id.clone(),
            date,
            records_found: 0,
            fields_populated: FieldSet::new(),
            missing: station.expected_fields.iter().map(|f| (*f, 0)).collect(),
            unexpected: FieldSet::new(),
        }
    }

    fn add(&mut self, station: &Station, record: &ObservationRecord) {
        self.records_found += 1;
        for (field, count) in self.missing.iter_mut() {
            if !record.is_populated(*field) {
                *count += 1;
            }
        }
        for (field, value) in &record.fields {
            if value.is_none() {
                continue;
            }
            self.fields_populated.insert(*field);
            if !field.is_astronomical() && !station.expected_fields.contains(field) {
                self.unexpected.insert(*field);
            }
        }
    }

    pub fn missing_count(&self, field: FieldName) -> usize {
        self.missing.get(&field).copied().unwrap_or(0)
    }

    /// Expected fields null or absent at least once.
    pub fn missing_expected(&self) -> Vec<FieldName> {
        self.missing
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(field, _)| *field)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.records_found == HOURS_PER_DAY && self.missing_expected().is_empty() && self.unexpected.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayVerification {
    pub date: NaiveDate,
    pub files_found: usize,
    pub reports: Vec<VerificationReport>,
}

impl DayVerification {
    pub fn discrepancies(&self) -> usize {
        self.reports.iter().filter(|r| !r.is_complete()).count()
    }

    /// Logs one line per station, at warn level when incomplete.
    pub fn log(&self) {
        if self.files_found < HOURS_PER_DAY {
            tracing::warn!(date = %self.date, files = self.files_found, "day has missing hour files");
        }
        for report in &self.reports {
            let missing: Vec<String> = report
                .missing
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(field, count)| format!("{}x{}", field, count))
                .collect();
            if report.is_complete() {
                tracing::info!(station = %report.station_id, date = %report.date, records = report.records_found, "complete");
            } else {
                let unexpected: Vec<&str> = report.unexpected.iter().map(|f| f.as_str()).collect();
                tracing::warn!(
                    station = %report.station_id,
                    date = %report.date,
                    records = report.records_found,
                    missing = %missing.join(","),
                    unexpected = %unexpected.join(","),
                    "incomplete"
                );
            }
        }
        tracing::info!(date = %self.date, stations = self.reports.len(), discrepancies = self.discrepancies(), "verification finished");
    }
}

/// Verifies `date` for every station in `stations`.
pub fn verify_day(output: &OutputStore, stations: &[Station], date: NaiveDate) -> Result<DayVerification> {
    let mut reports: Vec<VerificationReport> = stations
        .iter()
        .map(|station| VerificationReport::new(station, date))
        .collect();
    let mut files_found = 0;

    for hour in HourKey::range_inclusive(HourKey::first_of_day(date), HourKey::last_of_day(date)) {
        let Some(records) = output.read_hour(hour)? else {
            continue;
        };
        files_found += 1;
        for (station, report) in stations.iter().zip(reports.iter_mut()) {
            if let Some(record) = records.iter().find(|r| r.station_id == station.id) {
                report.add(station, record);
            }
        }
    }

    Ok(DayVerification {
        date,
        files_found,
        reports,
    })
}
