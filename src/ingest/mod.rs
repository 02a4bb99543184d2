//! Source adapters: one per upstream, all speaking `PartialRecord`.
//!
//! An adapter is told which of its fields the station actually expects and
//! only calls upstream for those. It never fails: an unreachable source or a
//! malformed payload turns every requested field null and produces exactly
//! one warning for that station-hour, however many upstream calls failed.

pub mod ndbc;
pub mod noaa;
pub mod smn;

#[cfg(test)]
pub(crate) mod fixtures;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::error::FetchError;
use crate::http::Fetch;
use crate::model::{FieldName, FieldSet, HourKey, PartialRecord, Source};
use crate::ratelimit::RateLimiter;
use crate::stations::Station;

/// Every canonical field `source` can ever supply.
pub fn owned_fields(source: Source) -> &'static [FieldName] {
    match source {
        Source::Noaa => noaa::OWNED_FIELDS,
        Source::Ndbc => ndbc::OWNED_FIELDS,
        Source::Smn => smn::OWNED_FIELDS,
    }
}

/// Everything an adapter needs to serve one station-hour.
#[derive(Debug, Clone)]
pub struct FetchContext<'a> {
    pub station: &'a Station,
    pub hour: HourKey,
    /// Station's expected fields restricted to what this adapter owns.
    pub requested: FieldSet,
    /// Wall-clock time of the run, for sources that only serve the present.
    pub now: DateTime<Utc>,
}

impl<'a> FetchContext<'a> {
    pub fn new(station: &'a Station, hour: HourKey, owned: &[FieldName], now: DateTime<Utc>) -> Self {
        let requested = station
            .expected_fields
            .iter()
            .copied()
            .filter(|f| owned.contains(f))
            .collect();
        Self {
            station,
            hour,
            requested,
            now,
        }
    }

    pub fn wants(&self, field: FieldName) -> bool {
        self.requested.contains(&field)
    }

    pub fn wants_any(&self, fields: &[FieldName]) -> bool {
        fields.iter().any(|f| self.wants(*f))
    }

    /// Failure result: every requested field null.
    pub fn all_null(&self) -> PartialRecord {
        PartialRecord::all_null(self.requested.iter())
    }
}

pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Every canonical field this source can ever supply.
    fn owned_fields(&self) -> &'static [FieldName];

    /// Observation for `ctx.station` covering `ctx.hour`. Contains exactly
    /// the keys of `ctx.requested`.
    fn fetch(&self, ctx: &FetchContext<'_>) -> PartialRecord;
}

/// Adapter lookup by source. A source absent here could not be configured
/// for this run; its stations are skipped.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn get(&self, source: Source) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&source)
    }

    pub fn contains(&self, source: Source) -> bool {
        self.adapters.contains_key(&source)
    }

    /// Builds the production adapters for `sources`. A source whose token
    /// cannot be resolved is left out with a warning rather than failing
    /// the run.
    pub fn from_config(
        config: &AppConfig,
        sources: &[Source],
        fetcher: Arc<dyn Fetch>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let mut set = AdapterSet::new();
        for source in sources {
            let source_config = config.sources.get(*source);
            let token = match source_config.resolve_token() {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(%source, "{}; stations of this source are skipped for the run", e);
                    continue;
                }
            };
            let adapter: Arc<dyn SourceAdapter> = match source {
                Source::Noaa => Arc::new(noaa::NoaaAdapter::new(
                    source_config,
                    Arc::clone(&fetcher),
                    Arc::clone(&limiter),
                )),
                Source::Ndbc => Arc::new(ndbc::NdbcAdapter::new(
                    source_config,
                    Arc::clone(&fetcher),
                    Arc::clone(&limiter),
                )),
                Source::Smn => match token {
                    Some(token) => Arc::new(smn::SmnAdapter::new(
                        source_config,
                        token,
                        Arc::clone(&fetcher),
                        Arc::clone(&limiter),
                    )),
                    None => {
                        tracing::warn!(%source, "SMN requires token_env to be configured; stations skipped");
                        continue;
                    }
                },
            };
            set.insert(adapter);
        }
        set
    }
}

/// Logs one upstream failure for a station-hour.
pub fn log_fetch_failure(source: Source, station: &str, hour: HourKey, what: &str, err: &FetchError) {
    let kind = match err {
        FetchError::NotFound | FetchError::Empty => "no data",
        FetchError::Status(_) | FetchError::Transport(_) => "unavailable",
        FetchError::Malformed(_) => "unexpected payload",
    };
    tracing::warn!(
        %source,
        station,
        hour = %hour,
        kind,
        "{} failed, fields set to null: {}",
        what,
        err
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
