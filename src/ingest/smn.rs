//! Servicio Meteorológico Nacional (Argentina) latest-observation client.
//!
//! The SMN web service only exposes the most recent reading of a station;
//! there is no way to ask for a past hour. The adapter therefore only calls
//! upstream when the requested hour is within `valid_hours` of the run's
//! wall clock, and answers every older (or future) hour with nulls without
//! touching the network. Backfilled SMN records are always null.
//!
//! A reading is only used for the hour it was observed in; a reading from
//! any other hour leaves the requested hour null.
//!
//! Requests carry a bearer token resolved from the environment at startup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::http::Fetch;
use crate::ingest::{log_fetch_failure, FetchContext, SourceAdapter};
use crate::model::{FieldName, HourKey, PartialRecord, Source};
use crate::ratelimit::RateLimiter;
use crate::units;

pub const OWNED_FIELDS: &[FieldName] = &[
    FieldName::VisibilityMi,
    FieldName::CloudPct,
    FieldName::WaveHtFt,
    FieldName::WindSpdKts,
    FieldName::WindDirDeg,
];

// ============================================================================
// API Response Structures
// ============================================================================

/// Latest observation, SI units.
#[derive(Debug, Deserialize)]
struct SmnObservation {
    /// RFC 3339 with local offset.
    date: Option<String>,
    wind: Option<SmnWind>,
    /// Kilometres.
    visibility: Option<f64>,
    /// Metres.
    wave_height: Option<f64>,
    /// Percent.
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SmnWind {
    /// m/s
    speed: Option<f64>,
    deg: Option<f64>,
}

/// Parsed observation in canonical units, plus its observation time.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestReading {
    pub observed_at: Option<DateTime<Utc>>,
    pub record: PartialRecord,
}

pub fn parse_latest(json: &str) -> Result<LatestReading, FetchError> {
    if json.trim().is_empty() {
        return Err(FetchError::Empty);
    }
    let obs: SmnObservation = serde_json::from_str(json)
        .map_err(|e| FetchError::Malformed(format!("SMN JSON: {}", e)))?;

    let observed_at = match obs.date.as_deref() {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| FetchError::Malformed(format!("SMN date '{}': {}", raw, e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let (speed, deg) = obs.wind.map(|w| (w.speed, w.deg)).unwrap_or((None, None));
    let mut record = PartialRecord::new();
    let mut put = |field: FieldName, value: Option<f64>| {
        record.set_number(field, units::sanitize(field, value));
    };
    put(FieldName::WindSpdKts, speed.map(units::ms_to_kts));
    put(FieldName::WindDirDeg, deg);
    put(FieldName::VisibilityMi, obs.visibility.map(units::km_to_mi));
    put(FieldName::WaveHtFt, obs.wave_height.map(units::m_to_ft));
    put(FieldName::CloudPct, obs.cloud_cover);

    Ok(LatestReading { observed_at, record })
}

// ============================================================================
// Adapter
// ============================================================================

pub struct SmnAdapter {
    base_url: String,
    token: String,
    valid_hours: i64,
    fetcher: Arc<dyn Fetch>,
    limiter: Arc<RateLimiter>,
}

impl SmnAdapter {
    pub fn new(config: &SourceConfig, token: String, fetcher: Arc<dyn Fetch>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            valid_hours: config.valid_hours.max(0),
            fetcher,
            limiter,
        }
    }

    pub fn latest_url(&self, station_id: &str) -> String {
        format!("{}/weather/location/{}", self.base_url, urlencoding::encode(station_id))
    }

    /// True when `hour` is close enough to `now` for the latest reading to
    /// stand for it.
    pub fn serves(&self, hour: HourKey, now: DateTime<Utc>) -> bool {
        let current = HourKey::containing(now);
        hour <= current && hour >= current.plus_hours(-self.valid_hours)
    }
}

impl SourceAdapter for SmnAdapter {
    fn source(&self) -> Source {
        Source::Smn
    }

    fn owned_fields(&self) -> &'static [FieldName] {
        OWNED_FIELDS
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> PartialRecord {
        if ctx.requested.is_empty() {
            return PartialRecord::new();
        }
        if !self.serves(ctx.hour, ctx.now) {
            tracing::debug!(station = %ctx.station.id, hour = %ctx.hour, "SMN serves only recent hours; fields null");
            return ctx.all_null();
        }

        let url = self.latest_url(&ctx.station.id);
        self.limiter.acquire(Source::Smn);
        let reading = match self
            .fetcher
            .get_text(&url, Some(&self.token))
            .and_then(|body| parse_latest(&body))
        {
            Ok(reading) => reading,
            Err(e) => {
                log_fetch_failure(Source::Smn, &ctx.station.id, ctx.hour, "latest observation", &e);
                return ctx.all_null();
            }
        };

        let observed_hour = reading.observed_at.map(HourKey::containing);
        if observed_hour != Some(ctx.hour) {
            tracing::warn!(
                station = %ctx.station.id,
                hour = %ctx.hour,
                observed_at = ?reading.observed_at,
                "latest SMN observation is not from the requested hour, fields set to null"
            );
            return ctx.all_null();
        }

        let mut record = PartialRecord::new();
        for (field, value) in reading.record.into_values() {
            if ctx.wants(field) {
                record.set_number(field, value.and_then(|v| v.as_f64()));
            }
        }
        record
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

    const TOKEN: &str = "test-token";

    fn registry() -> StationRegistry {
        StationRegistry::parse(
            "87692|Mar del Plata Aero|-37.934|-57.573|SMN|wind_spd_kts,wind_dir_deg,visibility_mi,wave_ht_ft,cloud_pct\n",
        )
    }

    fn adapter(fetcher: Arc<ScriptedFetcher>) -> SmnAdapter {
        let config = SourceConfig {
            base_url: "https://smn.test/v1".to_string(),
            valid_hours: 3,
            ..SourceConfig::default()
        };
        SmnAdapter::new(&config, TOKEN.to_string(), fetcher, Arc::new(RateLimiter::new([])))
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn number(record: &PartialRecord, field: FieldName) -> Option<f64> {
        record.get(field).and_then(FieldValue::as_f64)
    }

    #[test]
    fn test_current_hour_uses_latest_reading() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("/weather/location/87692", SMN_LATEST_JSON));
        let adapter = adapter(Arc::clone(&fetcher));
        let registry = registry();
        let now = at("2024-05-01T15:30:00Z");
        let ctx = FetchContext::new(&registry.stations()[0], HourKey::containing(now), OWNED_FIELDS, now);

        let record = adapter.fetch(&ctx);

        assert_eq!(number(&record, FieldName::WindSpdKts), Some(9.719));
        assert_eq!(number(&record, FieldName::WindDirDeg), Some(0.0));
        assert_eq!(number(&record, FieldName::VisibilityMi), Some(6.214));
        assert_eq!(number(&record, FieldName::WaveHtFt), Some(4.921));
        assert_eq!(number(&record, FieldName::CloudPct), Some(75.0));
        assert_eq!(fetcher.bearer_for("87692").as_deref(), Some(TOKEN));
    }

    #[test]
    fn test_historical_hour_is_null_without_upstream_call() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("/weather/location/87692", SMN_LATEST_JSON));
        let adapter = adapter(Arc::clone(&fetcher));
        let registry = registry();
        let now = at("2024-05-01T15:30:00Z");
        let ctx = FetchContext::new(
            &registry.stations()[0],
            HourKey::new(2024, 4, 20, 6).unwrap(),
            OWNED_FIELDS,
            now,
        );

        let record = adapter.fetch(&ctx);

        assert_eq!(record.len(), 5);
        assert!(record.iter().all(|(_, v)| v.is_none()));
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_validity_window_edges() {
        let adapter = adapter(Arc::new(ScriptedFetcher::default()));
        let now = at("2024-05-01T15:30:00Z");
        assert!(adapter.serves(HourKey::new(2024, 5, 1, 15).unwrap(), now));
        assert!(adapter.serves(HourKey::new(2024, 5, 1, 12).unwrap(), now));
        assert!(!adapter.serves(HourKey::new(2024, 5, 1, 11).unwrap(), now));
        assert!(!adapter.serves(HourKey::new(2024, 5, 1, 16).unwrap(), now));
    }

    #[test]
    fn test_stale_reading_is_discarded() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("/weather/location/87692", SMN_LATEST_JSON));
        let adapter = adapter(Arc::clone(&fetcher));
        let registry = registry();
        // reading is from 15:10Z; eight hours later it no longer counts
        let now = at("2024-05-01T23:20:00Z");
        let ctx = FetchContext::new(&registry.stations()[0], HourKey::containing(now), OWNED_FIELDS, now);

        let record = adapter.fetch(&ctx);

        assert_eq!(fetcher.calls().len(), 1);
        assert!(record.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_reading_from_another_hour_is_not_used() {
        let fetcher = Arc::new(ScriptedFetcher::default().route("/weather/location/87692", SMN_LATEST_JSON));
        let adapter = adapter(Arc::clone(&fetcher));
        let registry = registry();
        // observed 15:10Z; 12Z is inside the validity window but is not its hour
        let now = at("2024-05-01T15:30:00Z");
        let ctx = FetchContext::new(
            &registry.stations()[0],
            HourKey::new(2024, 5, 1, 12).unwrap(),
            OWNED_FIELDS,
            now,
        );

        let record = adapter.fetch(&ctx);

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(record.len(), 5);
        assert_eq!(number(&record, FieldName::WindSpdKts), None);
        assert!(record.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_reading_without_timestamp_is_not_used() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().route("/weather/location/87692", r#"{"wind": {"speed": 5.0, "deg": 90.0}}"#),
        );
        let adapter = adapter(fetcher);
        let registry = registry();
        let now = at("2024-05-01T15:30:00Z");
        let ctx = FetchContext::new(&registry.stations()[0], HourKey::containing(now), OWNED_FIELDS, now);

        assert!(adapter.fetch(&ctx).iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_unreachable_service_nulls_requested_fields() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().fail("/weather/location/", FetchError::Transport("connection reset".into())),
        );
        let adapter = adapter(fetcher);
        let registry = StationRegistry::parse("87692|Mar del Plata Aero|-37.934|-57.573|SMN|cloud_pct\n");
        let now = at("2024-05-01T15:30:00Z");
        let ctx = FetchContext::new(&registry.stations()[0], HourKey::containing(now), OWNED_FIELDS, now);

        let record = adapter.fetch(&ctx);

        assert_eq!(record.len(), 1);
        assert!(record.contains(FieldName::CloudPct));
        assert_eq!(record.get(FieldName::CloudPct), None);
    }

    #[test]
    fn test_parse_latest_reads_offset_timestamp() {
        let reading = parse_latest(SMN_LATEST_JSON).unwrap();
        assert_eq!(reading.observed_at, Some(at("2024-05-01T15:10:00Z")));
        assert!(matches!(parse_latest("{\"date\": \"yesterday\"}"), Err(FetchError::Malformed(_))));
    }
}
