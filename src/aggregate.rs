//! Hourly aggregation: one canonical record per station for one hour.
//!
//! Astronomy is computed once per hour and shared by every station. Station
//! fetches run on a bounded thread pool; results are put back into registry
//! order before the hour file is written.

use std::sync::mpsc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use threadpool::ThreadPool;

use crate::astro::AstroFields;
use crate::config::ReferenceLocation;
use crate::ingest::{AdapterSet, FetchContext, SourceAdapter};
use crate::model::{HourKey, ObservationRecord, PartialRecord};
use crate::stations::Station;

/// Composes the final record from adapter output and astronomy.
///
/// Starts from the all-null canonical record. Adapter values for fields the
/// station does not expect are a logic error: they are logged and dropped.
pub fn build_record(
    station: &Station,
    hour: HourKey,
    adapter_output: PartialRecord,
    astro: &PartialRecord,
    remove_nulls: bool,
) -> ObservationRecord {
    let mut record = ObservationRecord::empty(&station.id, hour);

    for (field, value) in adapter_output.into_values() {
        if field.is_astronomical() || !station.expected_fields.contains(&field) {
            tracing::error!(
                station = %station.id,
                source = %station.source,
                %field,
                "adapter returned a field the station does not expect; dropped"
            );
            continue;
        }
        record.fields.insert(field, value);
    }
    for (field, value) in astro.iter() {
        record.fields.insert(*field, value.clone());
    }

    if remove_nulls {
        record.strip_nulls();
    }
    record
}

/// Records of one hour, in registry order, plus the stations left out.
#[derive(Debug, Default)]
pub struct HourCollection {
    pub records: Vec<ObservationRecord>,
    pub skipped: Vec<String>,
}

pub struct Aggregator {
    adapters: AdapterSet,
    location: ReferenceLocation,
    remove_nulls: bool,
    pool: ThreadPool,
}

impl Aggregator {
    pub fn new(adapters: AdapterSet, location: ReferenceLocation, workers: usize, remove_nulls: bool) -> Self {
        Self {
            adapters,
            location,
            remove_nulls,
            pool: ThreadPool::with_name("station-worker".to_string(), workers.max(1)),
        }
    }

    pub fn remove_nulls(&self) -> bool {
        self.remove_nulls
    }

    /// Fetches and composes every usable station for `hour`.
    ///
    /// Stations with an invalid id or without a configured adapter are
    /// excluded from the hour. A worker that panics degrades its station to
    /// an all-null record; it never costs the other stations their data.
    pub fn collect_hour(&self, stations: &[Station], hour: HourKey, now: DateTime<Utc>) -> HourCollection {
        let astro = Arc::new(AstroFields::compute(hour, &self.location).to_partial());
        let mut collection = HourCollection::default();

        let mut jobs: Vec<(&Station, Arc<dyn SourceAdapter>)> = Vec::with_capacity(stations.len());
        for station in stations {
            if !station.has_valid_id() {
                tracing::warn!(station = %station.id, %hour, "invalid station id, excluded from hour");
                collection.skipped.push(station.id.clone());
                continue;
            }
            let Some(adapter) = self.adapters.get(station.source) else {
                tracing::debug!(station = %station.id, source = %station.source, "source not configured, excluded from hour");
                collection.skipped.push(station.id.clone());
                continue;
            };
            jobs.push((station, Arc::clone(adapter)));
        }

        let (tx, rx) = mpsc::channel::<(usize, ObservationRecord)>();
        for (index, (station, adapter)) in jobs.iter().enumerate() {
            let tx = tx.clone();
            let station = (*station).clone();
            let adapter = Arc::clone(adapter);
            let astro = Arc::clone(&astro);
            let remove_nulls = self.remove_nulls;
            self.pool.execute(move || {
                let ctx = FetchContext::new(&station, hour, adapter.owned_fields(), now);
                let output = adapter.fetch(&ctx);
                let record = build_record(&station, hour, output, &astro, remove_nulls);
                // receiver outlives every job of the hour
                let _ = tx.send((index, record));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<ObservationRecord>> = vec![None; jobs.len()];
        for (index, record) in rx.iter() {
            slots[index] = Some(record);
        }

        for ((station, _), slot) in jobs.iter().zip(slots) {
            let record = slot.unwrap_or_else(|| {
                tracing::error!(station = %station.id, %hour, "station worker panicked; emitting null record");
                build_record(station, hour, PartialRecord::new(), &astro, self.remove_nulls)
            });
            collection.records.push(record);
        }
        collection
    }
}
