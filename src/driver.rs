//! Run driver: walks hours in order, publishes each hour file, then
//! checkpoints it.
//!
//! Two entry points share one loop:
//!
//! - `run_backfill(start, end)`: every hour of the inclusive date range,
//!   resumable through a job checkpoint that is removed once the whole
//!   range is done.
//! - `run_realtime()`: up to the hour `now - max(lookback)` over the
//!   sources present in the registry, reaching back `realtime_catchup_hours`
//!   before it. The persistent `realtime` job skips hours already done, so
//!   repeated cron invocations are no-ops and a missed one is caught up.
//!
//! Once every hour of a day is checkpointed the day is verified and, when
//! configured, bundled by the archiver. The checkpoint records that this
//! step ran, so a run killed in between finishes it on resume.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregate::Aggregator;
use crate::archive::{self, Archiver, TarGzArchiver};
use crate::checkpoint::{self, CheckpointStore};
use crate::config::AppConfig;
use crate::error::{ArchiveError, IngestError, Result};
use crate::http::Fetch;
use crate::ingest::AdapterSet;
use crate::model::HourKey;
use crate::output::OutputStore;
use crate::ratelimit::RateLimiter;
use crate::stations::StationRegistry;
use crate::verify;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Counters logged at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub hours_processed: usize,
    pub hours_skipped: usize,
    pub records_written: usize,
    pub stations_skipped: BTreeSet<String>,
    pub days_verified: usize,
    pub discrepancies: usize,
    pub days_archived: usize,
}

impl RunSummary {
    pub fn log(&self, job_id: &str) {
        tracing::info!(
            job = job_id,
            hours_processed = self.hours_processed,
            hours_skipped = self.hours_skipped,
            records_written = self.records_written,
            stations_skipped = self.stations_skipped.len(),
            days_verified = self.days_verified,
            discrepancies = self.discrepancies,
            days_archived = self.days_archived,
            "run finished"
        );
    }
}

pub struct Driver {
    config: AppConfig,
    registry: StationRegistry,
    aggregator: Aggregator,
    output: OutputStore,
    archiver: Box<dyn Archiver>,
    clock: Clock,
}

impl Driver {
    pub fn new(config: AppConfig, registry: StationRegistry, adapters: AdapterSet) -> Self {
        for source in registry.sources() {
            if !adapters.contains(source) {
                tracing::warn!(%source, "no adapter configured; its stations are skipped for this run");
            }
        }
        let aggregator = Aggregator::new(
            adapters,
            config.reference_location.clone(),
            config.workers,
            config.remove_nulls,
        );
        let output = OutputStore::new(config.output_dir.clone(), config.product.clone());
        Self {
            config,
            registry,
            aggregator,
            output,
            archiver: Box::new(TarGzArchiver),
            clock: Arc::new(Utc::now),
        }
    }

    /// Production wiring: one rate limiter shared by all adapters.
    pub fn from_config(config: AppConfig, registry: StationRegistry, fetcher: Arc<dyn Fetch>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.sources));
        let adapters = AdapterSet::from_config(&config, &registry.sources(), fetcher, limiter);
        Self::new(config, registry, adapters)
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_archiver(mut self, archiver: Box<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn output(&self) -> &OutputStore {
        &self.output
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    /// Backfills every hour of `start..=end`.
    ///
    /// Hours that have not finished yet are left out; the job checkpoint is
    /// then kept so a later run of the same range picks them up.
    pub fn run_backfill(&self, start: NaiveDate, end: NaiveDate) -> Result<RunSummary> {
        if end < start {
            return Err(IngestError::InvalidRange(format!("end {} is before start {}", end, start)));
        }
        let first = HourKey::first_of_day(start);
        let mut last = HourKey::last_of_day(end);

        let latest_finished = HourKey::containing((self.clock)()).plus_hours(-1);
        if first > latest_finished {
            return Err(IngestError::InvalidRange(format!("start {} is in the future", start)));
        }
        let complete_range = last <= latest_finished;
        if !complete_range {
            tracing::warn!(requested_end = %last, clipped_to = %latest_finished, "range extends past the last finished hour");
            last = latest_finished;
        }

        let job_id = checkpoint::backfill_job_id(&self.config.product, start, end);
        tracing::info!(job = %job_id, %first, %last, stations = self.registry.len(), "starting backfill");
        let summary = self.run_hours(&job_id, HourKey::range_inclusive(first, last), complete_range)?;
        summary.log(&job_id);
        Ok(summary)
    }

    /// Hour processed by a realtime invocation at `now`.
    pub fn realtime_target(&self, now: DateTime<Utc>) -> HourKey {
        let lookback = self
            .registry
            .sources()
            .into_iter()
            .map(|source| self.config.sources.get(source).lookback_hours)
            .max()
            .unwrap_or(0)
            .max(0);
        HourKey::containing(now).plus_hours(-lookback)
    }

    pub fn run_realtime(&self) -> Result<RunSummary> {
        let target = self.realtime_target((self.clock)());
        let first = target.plus_hours(-self.config.realtime_catchup_hours.max(0));
        tracing::info!(hour = %target, catchup_from = %first, stations = self.registry.len(), "starting realtime run");
        let summary = self.run_hours(
            checkpoint::REALTIME_JOB_ID,
            HourKey::range_inclusive(first, target),
            false,
        )?;
        summary.log(checkpoint::REALTIME_JOB_ID);
        Ok(summary)
    }

    /// Core loop. An hour is checkpointed only after its file is published,
    /// and the next hour starts only after the checkpoint append is synced.
    fn run_hours(
        &self,
        job_id: &str,
        hours: impl Iterator<Item = HourKey>,
        finish_when_done: bool,
    ) -> Result<RunSummary> {
        let mut checkpoint = CheckpointStore::open(&self.config.checkpoint_dir, job_id)?;
        let mut summary = RunSummary::default();

        for hour in hours {
            if checkpoint.is_done(hour) {
                summary.hours_skipped += 1;
                self.settle_day_if_due(hour, &mut checkpoint, &mut summary)?;
                continue;
            }

            let collection = self.aggregator.collect_hour(self.registry.stations(), hour, (self.clock)());
            let path = self.output.publish(hour, &collection.records)?;
            checkpoint.mark_done(hour)?;

            tracing::info!(%hour, records = collection.records.len(), path = %path.display(), "hour complete");
            summary.hours_processed += 1;
            summary.records_written += collection.records.len();
            summary.stations_skipped.extend(collection.skipped);

            self.settle_day_if_due(hour, &mut checkpoint, &mut summary)?;
        }

        if finish_when_done {
            checkpoint.finish()?;
            tracing::info!(job = job_id, "job complete, checkpoint removed");
        }
        Ok(summary)
    }

    /// Runs the day hook after the last hour of a day, unless the
    /// checkpoint shows it already ran. The hook is recorded only when it
    /// left nothing to redo.
    fn settle_day_if_due(
        &self,
        hour: HourKey,
        checkpoint: &mut CheckpointStore,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let date = hour.date();
        if !hour.closes_day() || checkpoint.is_day_settled(date) {
            return Ok(());
        }
        if self.complete_day(date, summary) {
            checkpoint.mark_day_settled(date)?;
        }
        Ok(())
    }

    /// Day hook: audit, then optionally bundle. Neither step can fail the
    /// run. Returns false when archiving failed and should be retried.
    fn complete_day(&self, date: NaiveDate, summary: &mut RunSummary) -> bool {
        match verify::verify_day(&self.output, self.registry.stations(), date) {
            Ok(day) => {
                day.log();
                summary.days_verified += 1;
                summary.discrepancies += day.discrepancies();
            }
            Err(e) => tracing::warn!(%date, "verification skipped: {}", e),
        }

        if !self.config.archive_completed_days {
            return true;
        }
        match archive::archive_day(self.archiver.as_ref(), &self.output, date) {
            Ok(_) => {
                summary.days_archived += 1;
                true
            }
            // killed after the bundle was written but before it was recorded
            Err(ArchiveError::NoFiles(_)) if archive::day_bundle_path(&self.output, date).is_file() => true,
            Err(e) => {
                tracing::error!(%date, "archiving failed, hour files kept: {}", e);
                false
            }
        }
    }
}
