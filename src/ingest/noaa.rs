//! NOAA CO-OPS Data API client (tide gauges, current meters, met sensors).
//!
//! API Documentation: https://api.tidesandcurrents.noaa.gov/api/prod/
//!
//! The datagetter has a noticeable per-call overhead, so each product is
//! requested once per station per month and the month series is cached;
//! individual hours are then cut out of the cached series by timestamp
//! prefix (`YYYY-MM-DD HH`). Samples arrive every 6 minutes.
//!
//! Requests use `units=english`, so water level is already in feet and
//! speeds in knots; visibility comes back in nautical miles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::http::Fetch;
use crate::ingest::{log_fetch_failure, FetchContext, SourceAdapter};
use crate::model::{FieldName, HourKey, PartialRecord, Source};
use crate::ratelimit::RateLimiter;
use crate::units;

pub const OWNED_FIELDS: &[FieldName] = &[
    FieldName::TideHeightFt,
    FieldName::TideSpeedKts,
    FieldName::TideDirDeg,
    FieldName::VisibilityMi,
    FieldName::WindSpdKts,
    FieldName::WindDirDeg,
];

// ============================================================================
// Products
// ============================================================================

/// One datagetter product and the canonical fields it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    WaterLevel,
    Currents,
    Wind,
    Visibility,
}

impl Product {
    pub const ALL: [Product; 4] = [
        Product::WaterLevel,
        Product::Currents,
        Product::Wind,
        Product::Visibility,
    ];

    pub fn api_name(&self) -> &'static str {
        match self {
            Product::WaterLevel => "water_level",
            Product::Currents => "currents",
            Product::Wind => "wind",
            Product::Visibility => "visibility",
        }
    }

    pub fn fields(&self) -> &'static [FieldName] {
        match self {
            Product::WaterLevel => &[FieldName::TideHeightFt],
            Product::Currents => &[FieldName::TideSpeedKts, FieldName::TideDirDeg],
            Product::Wind => &[FieldName::WindSpdKts, FieldName::WindDirDeg],
            Product::Visibility => &[FieldName::VisibilityMi],
        }
    }
}

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct CoopsResponse {
    #[serde(default)]
    data: Vec<CoopsSample>,
    error: Option<CoopsError>,
}

#[derive(Debug, Deserialize)]
struct CoopsError {
    message: String,
}

/// Values are usually JSON strings; numbers and nulls are tolerated.
#[derive(Debug, Deserialize)]
struct CoopsSample {
    t: String,
    #[serde(default)]
    v: Option<Value>,
    #[serde(default)]
    s: Option<Value>,
    #[serde(default)]
    d: Option<Value>,
}

/// One parsed sample. `value` is water level, speed or visibility
/// depending on the product; `direction` is set for currents and wind.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// `YYYY-MM-DD HH:MM`, GMT.
    pub timestamp: String,
    pub value: Option<f64>,
    pub direction: Option<f64>,
}

#[derive(Debug)]
struct MonthSeries {
    samples: Vec<Sample>,
    /// The month had already ended when fetched; nothing new will appear.
    closed: bool,
}

impl MonthSeries {
    fn covers(&self, prefix: &str) -> bool {
        self.closed
            || self
                .samples
                .last()
                .is_some_and(|s| s.timestamp.get(..prefix.len()).is_some_and(|p| p >= prefix))
    }
}

type SeriesKey = (String, Product, i32, u32);

// ============================================================================
// URL construction and parsing
// ============================================================================

/// Last calendar day of `year`-`month`.
fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

/// Builds a month-wide datagetter URL for one product.
pub fn build_month_url(base_url: &str, station_id: &str, product: Product, year: i32, month: u32) -> String {
    let last_day = month_end(year, month).map(|d| d.day()).unwrap_or(28);
    let datum = if product == Product::WaterLevel { "&datum=MLLW" } else { "" };
    format!(
        "{}?product={}&station={}&begin_date={:04}{:02}01&end_date={:04}{:02}{:02}&units=english&time_zone=gmt&format=json&application=marinemon{}",
        base_url,
        product.api_name(),
        urlencoding::encode(station_id),
        year,
        month,
        year,
        month,
        last_day,
        datum
    )
}

fn measure(value: &Option<Value>) -> Option<f64> {
    match value {
        Some(Value::String(s)) => units::parse_measure(s, &[]),
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Parses a datagetter JSON body. An explicit "no data" error is a
/// reachable source with nothing to report, i.e. an empty series.
pub fn parse_series(json: &str, product: Product) -> Result<Vec<Sample>, FetchError> {
    if json.trim().is_empty() {
        return Err(FetchError::Empty);
    }
    let response: CoopsResponse = serde_json::from_str(json)
        .map_err(|e| FetchError::Malformed(format!("CO-OPS JSON: {}", e)))?;

    if let Some(error) = response.error {
        if error.message.to_ascii_lowercase().contains("no data") {
            return Ok(Vec::new());
        }
        return Err(FetchError::Malformed(error.message));
    }

    Ok(response
        .data
        .into_iter()
        .map(|raw| {
            let (value, direction) = match product {
                Product::WaterLevel | Product::Visibility => (measure(&raw.v), None),
                Product::Currents | Product::Wind => (measure(&raw.s), measure(&raw.d)),
            };
            Sample {
                timestamp: raw.t,
                value,
                direction,
            }
        })
        .collect())
}

/// Samples whose timestamp starts with the hour prefix `YYYY-MM-DD HH`.
pub fn samples_in_hour<'a>(samples: &'a [Sample], hour: HourKey) -> Vec<&'a Sample> {
    let prefix = hour_prefix(hour);
    samples
        .iter()
        .filter(|s| s.timestamp.starts_with(&prefix))
        .collect()
}

fn hour_prefix(hour: HourKey) -> String {
    hour.start().format("%Y-%m-%d %H").to_string()
}

/// Reduces one hour of samples to canonical fields.
///
/// Water level and currents are averaged (direction included, naively);
/// wind and visibility take the first in-hour sample carrying a value. Wind
/// speed and direction always come from the same sample.
pub fn summarize(product: Product, samples: &[&Sample]) -> PartialRecord {
    let mut record = PartialRecord::new();
    let first_with_value = samples.iter().find(|s| s.value.is_some());

    match product {
        Product::WaterLevel => {
            let height = units::mean(samples.iter().filter_map(|s| s.value));
            record.set_number(FieldName::TideHeightFt, height);
        }
        Product::Currents => {
            let speed = units::mean(samples.iter().filter_map(|s| s.value));
            let direction = units::mean(samples.iter().filter_map(|s| s.direction));
            record.set_number(FieldName::TideSpeedKts, speed);
            record.set_number(FieldName::TideDirDeg, direction);
        }
        Product::Wind => {
            record.set_number(FieldName::WindSpdKts, first_with_value.and_then(|s| s.value));
            record.set_number(FieldName::WindDirDeg, first_with_value.and_then(|s| s.direction));
        }
        Product::Visibility => {
            let visibility = first_with_value.and_then(|s| s.value).map(units::nm_to_mi);
            record.set_number(FieldName::VisibilityMi, visibility);
        }
    }
    record
}

// ============================================================================
// Adapter
// ============================================================================

pub struct NoaaAdapter {
    base_url: String,
    fetcher: Arc<dyn Fetch>,
    limiter: Arc<RateLimiter>,
    months: Mutex<HashMap<SeriesKey, Arc<MonthSeries>>>,
}

impl NoaaAdapter {
    pub fn new(config: &SourceConfig, fetcher: Arc<dyn Fetch>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('?').to_string(),
            fetcher,
            limiter,
            months: Mutex::new(HashMap::new()),
        }
    }

    /// Month series for (station, product) covering `hour`, from cache when
    /// it already reaches that hour.
    fn month_series(
        &self,
        station_id: &str,
        product: Product,
        hour: HourKey,
        now: DateTime<Utc>,
    ) -> Result<Arc<MonthSeries>, FetchError> {
        let key: SeriesKey = (station_id.to_string(), product, hour.year(), hour.month());
        let prefix = hour_prefix(hour);

        if let Some(cached) = self.lock_months().get(&key) {
            if cached.covers(&prefix) {
                return Ok(Arc::clone(cached));
            }
        }

        let url = build_month_url(&self.base_url, station_id, product, hour.year(), hour.month());
        self.limiter.acquire(Source::Noaa);
        tracing::debug!(station = station_id, product = product.api_name(), %url, "fetching month window");
        let body = self.fetcher.get_text(&url, None)?;
        let samples = parse_series(&body, product)?;

        let closed = month_end(hour.year(), hour.month())
            .map(|end| HourKey::last_of_day(end).next().start() <= now)
            .unwrap_or(false);
        let series = Arc::new(MonthSeries { samples, closed });
        let mut months = self.lock_months();
        // hours move forward; earlier months of this station and product are done with
        months.retain(|(station, p, year, month), _| {
            station != station_id || *p != product || (*year, *month) >= (hour.year(), hour.month())
        });
        months.insert(key, Arc::clone(&series));
        Ok(series)
    }

    fn lock_months(&self) -> std::sync::MutexGuard<'_, HashMap<SeriesKey, Arc<MonthSeries>>> {
        self.months.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requested fields of one product; the error is returned alongside the
    /// nulls so the caller can report the station-hour once.
    fn fetch_product(&self, ctx: &FetchContext<'_>, product: Product) -> (PartialRecord, Option<FetchError>) {
        let (summary, error) = match self.month_series(&ctx.station.id, product, ctx.hour, ctx.now) {
            Ok(series) => (summarize(product, &samples_in_hour(&series.samples, ctx.hour)), None),
            Err(e) => (PartialRecord::all_null(product.fields()), Some(e)),
        };
        (restrict(summary, ctx), error)
    }
}

/// One warning for every product that failed in a station-hour.
fn report_failures(ctx: &FetchContext<'_>, failures: &[(Product, FetchError)]) {
    let Some((_, first)) = failures.first() else {
        return;
    };
    let products: Vec<&str> = failures.iter().map(|(p, _)| p.api_name()).collect();
    log_fetch_failure(Source::Noaa, &ctx.station.id, ctx.hour, &products.join(", "), first);
    for (product, error) in &failures[1..] {
        tracing::debug!(station = %ctx.station.id, hour = %ctx.hour, product = product.api_name(), "also failed: {}", error);
    }
}

/// Keeps only requested fields and applies the range guards.
fn restrict(summary: PartialRecord, ctx: &FetchContext<'_>) -> PartialRecord {
    let mut record = PartialRecord::new();
    for (field, value) in summary.into_values() {
        if ctx.wants(field) {
            let number = value.and_then(|v| v.as_f64());
            record.set_number(field, units::sanitize(field, number));
        }
    }
    record
}

impl SourceAdapter for NoaaAdapter {
    fn source(&self) -> Source {
        Source::Noaa
    }

    fn owned_fields(&self) -> &'static [FieldName] {
        OWNED_FIELDS
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> PartialRecord {
        let products: Vec<Product> = Product::ALL
            .into_iter()
            .filter(|p| ctx.wants_any(p.fields()))
            .collect();

        let mut record = PartialRecord::new();
        let mut failures = Vec::new();
        if products.len() <= 1 {
            for product in products {
                let (part, error) = self.fetch_product(ctx, product);
                record.merge(part);
                failures.extend(error.map(|e| (product, e)));
            }
            report_failures(ctx, &failures);
            return record;
        }

        // Field groups overlap their network latency; the NOAA rate limiter
        // still spaces the actual calls.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        std::thread::scope(|scope| {
            let handles: Vec<_> = products
                .iter()
                .map(|product| {
                    let product = *product;
                    let dispatch = dispatch.clone();
                    let handle = scope.spawn(move || {
                        tracing::dispatcher::with_default(&dispatch, || self.fetch_product(ctx, product))
                    });
                    (product, handle)
                })
                .collect();
            for (product, handle) in handles {
                match handle.join() {
                    Ok((part, error)) => {
                        record.merge(part);
                        failures.extend(error.map(|e| (product, e)));
                    }
                    Err(_) => {
                        tracing::error!(station = %ctx.station.id, product = product.api_name(), "field group worker panicked");
                        let nulls = product.fields().iter().filter(|f| ctx.wants(**f));
                        record.merge(PartialRecord::all_null(nulls));
                    }
                }
            }
        });
        report_failures(ctx, &failures);
        record
    }
}

// ============================================================================
// Tests
// ============================================================================
