//! NDBC realtime2 buoy feed client.
//!
//! Each buoy publishes a whitespace-separated text file covering roughly the
//! last 45 days, newest line first:
//!
//! ```text
//! #YY  MM DD hh mm WDIR WSPD GST  WVHT   DPD ... VIS PTDY  TIDE
//! #yr  mo dy hr mn degT m/s  m/s     m   sec ... nmi  hPa    ft
//! 2024 05 01 12 50 210  6.0  7.0   1.2     6 ...  MM   MM    MM
//! ```
//!
//! `MM` marks a missing value. Columns are located by header name, never by
//! position, since NDBC has added columns over the years.
//!
//! One download serves every hour in its window, so feeds are cached per
//! station for `feed_cache_secs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::http::Fetch;
use crate::ingest::{log_fetch_failure, FetchContext, SourceAdapter};
use crate::model::{FieldName, HourKey, PartialRecord, Source};
use crate::ratelimit::RateLimiter;
use crate::units;

pub const OWNED_FIELDS: &[FieldName] = &[
    FieldName::TideHeightFt,
    FieldName::VisibilityMi,
    FieldName::WaveHtFt,
    FieldName::WindSpdKts,
    FieldName::WindDirDeg,
];

const MISSING: &str = "MM";

/// Feed column feeding each canonical field, with the conversion from the
/// feed's native unit.
const COLUMNS: &[(&str, FieldName, fn(f64) -> f64)] = &[
    ("WDIR", FieldName::WindDirDeg, identity),
    ("WSPD", FieldName::WindSpdKts, units::ms_to_kts),
    ("WVHT", FieldName::WaveHtFt, units::m_to_ft),
    ("VIS", FieldName::VisibilityMi, units::nm_to_mi),
    ("TIDE", FieldName::TideHeightFt, identity),
];

fn identity(v: f64) -> f64 {
    v
}

/// One observation line, values still in feed units.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub hour: HourKey,
    pub values: HashMap<FieldName, f64>,
}

// ============================================================================
// Parsing
// ============================================================================

fn column(header: &[&str], name: &str) -> Option<usize> {
    header.iter().position(|h| *h == name)
}

/// Parses a full standard-meteorological feed.
///
/// Lines that do not carry a valid timestamp are skipped; a feed without a
/// usable header is malformed.
pub fn parse_feed(text: &str) -> Result<Vec<FeedRow>, FetchError> {
    if text.trim().is_empty() {
        return Err(FetchError::Empty);
    }

    let header_line = text
        .lines()
        .find(|l| l.starts_with('#') && l.contains("YY"))
        .ok_or_else(|| FetchError::Malformed("NDBC feed has no header line".to_string()))?;
    let header: Vec<&str> = header_line.trim_start_matches('#').split_whitespace().collect();

    let (Some(yy), Some(mm), Some(dd), Some(hh)) = (
        column(&header, "YY"),
        column(&header, "MM"),
        column(&header, "DD"),
        column(&header, "hh"),
    ) else {
        return Err(FetchError::Malformed(format!(
            "NDBC header lacks timestamp columns: {}",
            header_line
        )));
    };

    let wanted: Vec<(usize, FieldName)> = COLUMNS
        .iter()
        .filter_map(|(name, field, _)| column(&header, name).map(|idx| (idx, *field)))
        .collect();

    let mut rows = Vec::new();
    for line in text.lines().filter(|l| !l.starts_with('#')) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < header.len() {
            continue;
        }

        let number = |idx: usize| parts[idx].parse::<u32>().ok();
        let Some(hour) = (|| {
            let year = number(yy)? as i32;
            let year = if year < 100 { year + 2000 } else { year };
            HourKey::new(year, number(mm)?, number(dd)?, number(hh)?)
        })() else {
            continue;
        };

        let values = wanted
            .iter()
            .filter_map(|(idx, field)| {
                units::parse_measure(parts[*idx], &[MISSING]).map(|v| (*field, v))
            })
            .collect();
        rows.push(FeedRow { hour, values });
    }
    Ok(rows)
}

/// Averages every reading inside `hour` per requested field, then converts
/// to canonical units. A field with no reading in the hour is null.
pub fn summarize_hour(rows: &[FeedRow], hour: HourKey, ctx: &FetchContext<'_>) -> PartialRecord {
    let in_hour: Vec<&FeedRow> = rows.iter().filter(|r| r.hour == hour).collect();
    let mut record = PartialRecord::new();
    for (_, field, convert) in COLUMNS {
        if !ctx.wants(*field) {
            continue;
        }
        let average = units::mean(in_hour.iter().filter_map(|r| r.values.get(field).copied()));
        record.set_number(*field, units::sanitize(*field, average.map(convert)));
    }
    record
}

// ============================================================================
// Adapter
// ============================================================================

struct CachedFeed {
    fetched_at: Instant,
    rows: Arc<Vec<FeedRow>>,
}

pub struct NdbcAdapter {
    base_url: String,
    cache_ttl: Duration,
    fetcher: Arc<dyn Fetch>,
    limiter: Arc<RateLimiter>,
    feeds: Mutex<HashMap<String, CachedFeed>>,
}

impl NdbcAdapter {
    pub fn new(config: &SourceConfig, fetcher: Arc<dyn Fetch>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache_ttl: Duration::from_secs(config.feed_cache_secs),
            fetcher,
            limiter,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn feed_url(&self, station_id: &str) -> String {
        format!("{}/{}.txt", self.base_url, station_id.to_ascii_uppercase())
    }

    fn feed(&self, station_id: &str) -> Result<Arc<Vec<FeedRow>>, FetchError> {
        if !self.cache_ttl.is_zero() {
            let feeds = self.feeds.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = feeds.get(station_id) {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(Arc::clone(&cached.rows));
                }
            }
        }

        let url = self.feed_url(station_id);
        self.limiter.acquire(Source::Ndbc);
        tracing::debug!(station = station_id, %url, "fetching buoy feed");
        let body = self.fetcher.get_text(&url, None)?;
        let rows = Arc::new(parse_feed(&body)?);

        if !self.cache_ttl.is_zero() {
            self.feeds.lock().unwrap_or_else(|p| p.into_inner()).insert(
                station_id.to_string(),
                CachedFeed {
                    fetched_at: Instant::now(),
                    rows: Arc::clone(&rows),
                },
            );
        }
        Ok(rows)
    }
}

impl SourceAdapter for NdbcAdapter {
    fn source(&self) -> Source {
        Source::Ndbc
    }

    fn owned_fields(&self) -> &'static [FieldName] {
        OWNED_FIELDS
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> PartialRecord {
        if ctx.requested.is_empty() {
            return PartialRecord::new();
        }
        match self.feed(&ctx.station.id) {
            Ok(rows) => summarize_hour(&rows, ctx.hour, ctx),
            Err(e) => {
                log_fetch_failure(Source::Ndbc, &ctx.station.id, ctx.hour, "buoy feed", &e);
                ctx.all_null()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;
    use crate::model::FieldValue;
    use crate::stations::StationRegistry;
    use chrono::Utc;

    fn registry() -> StationRegistry {
        StationRegistry::parse(
            "44013|Boston 16 NM East|42.346|-70.651|NDBC|wind_dir_deg,wind_spd_kts,wave_ht_ft,visibility_mi\n",
        )
    }

    fn adapter(fetcher: Arc<ScriptedFetcher>, cache_secs: u64) -> NdbcAdapter {
        let config = SourceConfig {
            base_url: "https://ndbc.test/data/realtime2/".to_string(),
            feed_cache_secs: cache_secs,
            ..SourceConfig::default()
        };
        NdbcAdapter::new(&config, fetcher, Arc::new(RateLimiter::new([])))
    }

    fn number(record: &PartialRecord, field: FieldName) -> Option<f64> {
        record.get(field).and_then(FieldValue::as_f64)
    }

    #[test]
    fn test_parse_feed_skips_header_lines() {
        let rows = parse_feed(NDBC_FEED).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].hour, HourKey::new(2024, 5, 1, 12).unwrap());
        assert_eq!(rows[0].values.get(&FieldName::WindDirDeg), Some(&210.0));
        assert!(rows[2].values.is_empty(), "all-MM line carries no values");
    }

    #[test]
    fn test_two_digit_year_is_twenty_first_century() {
        let feed = "#YY MM DD hh mm WSPD\n#yr mo dy hr mn m/s\n24 05 01 03 00 2.0\n";
        let rows = parse_feed(feed).unwrap();
        assert_eq!(rows[0].hour, HourKey::new(2024, 5, 1, 3).unwrap());
    }

    #[test]
    fn test_feed_without_header_is_malformed() {
        assert!(matches!(parse_feed("2024 05 01 12 50 210"), Err(FetchError::Malformed(_))));
        assert_eq!(parse_feed(""), Err(FetchError::Empty));
    }

    #[test]
    fn test_hour_readings_are_averaged_and_converted() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("44013.txt", NDBC_FEED));
        let adapter = adapter(Arc::clone(&fetcher), 600);
        let registry = registry();
        let ctx = FetchContext::new(
            &registry.stations()[0],
            HourKey::new(2024, 5, 1, 12).unwrap(),
            OWNED_FIELDS,
            Utc::now(),
        );

        let record = adapter.fetch(&ctx);

        assert_eq!(record.len(), 4);
        assert_eq!(number(&record, FieldName::WindDirDeg), Some(200.0));
        // 5.0 m/s
        assert_eq!(number(&record, FieldName::WindSpdKts), Some(9.719));
        // 1.0 m
        assert_eq!(number(&record, FieldName::WaveHtFt), Some(3.281));
        // single 10.0 nmi reading; the MM line does not dilute it
        assert_eq!(number(&record, FieldName::VisibilityMi), Some(11.508));
        assert!(!record.contains(FieldName::TideHeightFt), "not expected by the station");
    }

    #[test]
    fn test_all_missing_hour_is_null_not_zero() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("44013.txt", NDBC_FEED));
        let adapter = adapter(fetcher, 600);
        let registry = registry();
        let ctx = FetchContext::new(
            &registry.stations()[0],
            HourKey::new(2024, 5, 1, 11).unwrap(),
            OWNED_FIELDS,
            Utc::now(),
        );

        let record = adapter.fetch(&ctx);

        assert_eq!(record.len(), 4);
        assert!(record.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_feed_is_cached_across_hours() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("44013.txt", NDBC_FEED));
        let adapter = adapter(Arc::clone(&fetcher), 600);
        let registry = registry();
        for hour in [11, 12] {
            let ctx = FetchContext::new(
                &registry.stations()[0],
                HourKey::new(2024, 5, 1, hour).unwrap(),
                OWNED_FIELDS,
                Utc::now(),
            );
            adapter.fetch(&ctx);
        }
        assert_eq!(fetcher.calls(), vec!["https://ndbc.test/data/realtime2/44013.txt".to_string()]);
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("44013.txt", NDBC_FEED));
        let adapter = adapter(Arc::clone(&fetcher), 0);
        let registry = registry();
        for hour in [11, 12] {
            let ctx = FetchContext::new(
                &registry.stations()[0],
                HourKey::new(2024, 5, 1, hour).unwrap(),
                OWNED_FIELDS,
                Utc::now(),
            );
            adapter.fetch(&ctx);
        }
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[test]
    fn test_missing_feed_nulls_requested_fields() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let adapter = adapter(Arc::clone(&fetcher), 600);
        let registry = registry();
        let ctx = FetchContext::new(
            &registry.stations()[0],
            HourKey::new(2024, 5, 1, 12).unwrap(),
            OWNED_FIELDS,
            Utc::now(),
        );

        let record = adapter.fetch(&ctx);

        assert_eq!(record, ctx.all_null());
        assert_eq!(record.len(), 4);
    }
}
