//! Core data types for the marine observation ingestion service.
//!
//! Shared domain model imported by every other module: the canonical field
//! set, hour buckets, per-source partial records and the final per-station
//! observation record. No I/O lives here.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Upstream sources
// ---------------------------------------------------------------------------

/// Upstream data source a station reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    /// NOAA CO-OPS tide and current gauges.
    Noaa,
    /// NDBC moored buoys (realtime2 text feeds).
    Ndbc,
    /// Servicio Meteorológico Nacional surface stations.
    Smn,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Noaa, Source::Ndbc, Source::Smn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Noaa => "NOAA",
            Source::Ndbc => "NDBC",
            Source::Smn => "SMN",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOAA" => Ok(Source::Noaa),
            "NDBC" => Ok(Source::Ndbc),
            "SMN" => Ok(Source::Smn),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical fields
// ---------------------------------------------------------------------------

/// One entry of the canonical per-station-per-hour schema.
///
/// Declaration order is the canonical output order: `Ord` is derived, so a
/// `BTreeMap<FieldName, _>` iterates (and serializes) in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    TideHeightFt,
    TideSpeedKts,
    TideDirDeg,
    VisibilityMi,
    CloudPct,
    WaveHtFt,
    WindSpdKts,
    WindDirDeg,
    MoonPhasePct,
    SunriseTime,
    SunsetTime,
}

impl FieldName {
    pub const ALL: [FieldName; 11] = [
        FieldName::TideHeightFt,
        FieldName::TideSpeedKts,
        FieldName::TideDirDeg,
        FieldName::VisibilityMi,
        FieldName::CloudPct,
        FieldName::WaveHtFt,
        FieldName::WindSpdKts,
        FieldName::WindDirDeg,
        FieldName::MoonPhasePct,
        FieldName::SunriseTime,
        FieldName::SunsetTime,
    ];

    /// Station-independent fields filled by the astronomical calculator.
    pub const ASTRONOMICAL: [FieldName; 3] = [
        FieldName::MoonPhasePct,
        FieldName::SunriseTime,
        FieldName::SunsetTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::TideHeightFt => "tide_height_ft",
            FieldName::TideSpeedKts => "tide_speed_kts",
            FieldName::TideDirDeg => "tide_dir_deg",
            FieldName::VisibilityMi => "visibility_mi",
            FieldName::CloudPct => "cloud_pct",
            FieldName::WaveHtFt => "wave_ht_ft",
            FieldName::WindSpdKts => "wind_spd_kts",
            FieldName::WindDirDeg => "wind_dir_deg",
            FieldName::MoonPhasePct => "moon_phase_pct",
            FieldName::SunriseTime => "sunrise_time",
            FieldName::SunsetTime => "sunset_time",
        }
    }

    pub fn is_astronomical(&self) -> bool {
        Self::ASTRONOMICAL.contains(self)
    }

    /// True for compass directions, which must stay within [0, 360).
    pub fn is_direction(&self) -> bool {
        matches!(self, FieldName::TideDirDeg | FieldName::WindDirDeg)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FieldName::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown field name '{}'", wanted))
    }
}

/// Set of canonical fields, ordered canonically.
pub type FieldSet = BTreeSet<FieldName>;

/// A populated field value. Numbers are already in canonical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hour buckets
// ---------------------------------------------------------------------------

/// One-hour UTC bucket: the atomic unit of fetch, store and checkpoint.
///
/// Stored as the bucket's start instant with minutes and seconds zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourKey(NaiveDateTime);

impl HourKey {
    /// Returns `None` for calendar-invalid inputs or `hour > 23`.
    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
        Some(HourKey(NaiveDateTime::new(date, time)))
    }

    /// Bucket containing `instant` (truncates minutes and seconds).
    pub fn containing(instant: DateTime<Utc>) -> Self {
        let naive = instant.naive_utc();
        let start = naive.date().and_hms_opt(naive.hour(), 0, 0).unwrap_or(naive);
        HourKey(start)
    }

    /// First hour (00Z) of `date`.
    pub fn first_of_day(date: NaiveDate) -> Self {
        HourKey(NaiveDateTime::new(date, NaiveTime::MIN))
    }

    /// Last hour (23Z) of `date`.
    pub fn last_of_day(date: NaiveDate) -> Self {
        HourKey::first_of_day(date).plus_hours(23)
    }

    pub fn plus_hours(&self, hours: i64) -> Self {
        HourKey(self.0 + Duration::hours(hours))
    }

    pub fn next(&self) -> Self {
        self.plus_hours(1)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }

    /// True when this is the 23Z bucket, i.e. the one that completes a day.
    pub fn closes_day(&self) -> bool {
        self.hour() == 23
    }

    /// Checkpoint form: `YYYYMMDDTHH`.
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%dT%H").to_string()
    }

    /// Record timestamp form: `YYYY-MM-DDTHH:00:00Z`.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%dT%H:00:00Z").to_string()
    }

    /// Every hour from `first` to `last`, both inclusive. Empty if reversed.
    pub fn range_inclusive(first: HourKey, last: HourKey) -> impl Iterator<Item = HourKey> {
        let count = if last < first {
            0
        } else {
            (last.0 - first.0).num_hours() + 1
        };
        (0..count).map(move |offset| first.plus_hours(offset))
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

impl FromStr for HourKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || format!("invalid hour key '{}', expected YYYYMMDDTHH", s);
        if s.len() != 11 || s.as_bytes()[8] != b'T' {
            return Err(bad());
        }
        let date = NaiveDate::parse_from_str(&s[..8], "%Y%m%d").map_err(|_| bad())?;
        let hour: u32 = s[9..].parse().map_err(|_| bad())?;
        let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(bad)?;
        Ok(HourKey(NaiveDateTime::new(date, time)))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Output of one adapter call: only fields the adapter owns and was asked
/// for. `None` means "source reachable but value absent".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    values: BTreeMap<FieldName, Option<FieldValue>>,
}

impl PartialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field of `fields` explicitly null. Used when the upstream call
    /// failed as a whole.
    pub fn all_null<'a>(fields: impl IntoIterator<Item = &'a FieldName>) -> Self {
        let mut record = PartialRecord::new();
        for field in fields {
            record.values.insert(*field, None);
        }
        record
    }

    pub fn set_number(&mut self, field: FieldName, value: Option<f64>) {
        self.values.insert(field, value.map(FieldValue::Number));
    }

    pub fn set_text(&mut self, field: FieldName, value: Option<String>) {
        self.values.insert(field, value.map(FieldValue::Text));
    }

    pub fn set_null(&mut self, field: FieldName) {
        self.values.insert(field, None);
    }

    pub fn get(&self, field: FieldName) -> Option<&FieldValue> {
        self.values.get(&field).and_then(|v| v.as_ref())
    }

    pub fn contains(&self, field: FieldName) -> bool {
        self.values.contains_key(&field)
    }

    pub fn merge(&mut self, other: PartialRecord) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &Option<FieldValue>)> {
        self.values.iter()
    }

    pub fn into_values(self) -> BTreeMap<FieldName, Option<FieldValue>> {
        self.values
    }
}

/// One station's canonical record for one hour: one line of an hour file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub station_id: String,
    /// Hour bucket start, `YYYY-MM-DDTHH:00:00Z`.
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: BTreeMap<FieldName, Option<FieldValue>>,
}

impl ObservationRecord {
    /// Record with every canonical field present and null.
    pub fn empty(station_id: &str, hour: HourKey) -> Self {
        ObservationRecord {
            station_id: station_id.to_string(),
            timestamp: hour.iso(),
            fields: FieldName::ALL.iter().map(|f| (*f, None)).collect(),
        }
    }

    pub fn get(&self, field: FieldName) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(|v| v.as_ref())
    }

    pub fn is_populated(&self, field: FieldName) -> bool {
        self.get(field).is_some()
    }

    /// Null-removal mode: drop every null-valued key.
    pub fn strip_nulls(&mut self) {
        self.fields.retain(|_, value| value.is_some());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
