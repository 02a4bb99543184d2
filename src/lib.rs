//! marinemon_service: hourly marine observation ingestion for NOAA CO-OPS
//! gauges, NDBC buoys and SMN stations.
//!
//! # Module structure
//!
//! ```text
//! marinemon_service
//! ├── model       — shared data types (FieldName, HourKey, PartialRecord, ObservationRecord)
//! ├── error       — error enums (FetchError, CheckpointError, IngestError, …)
//! ├── config      — service configuration loader (marinemon.toml)
//! ├── stations    — station registry (stations.list)
//! ├── units       — unit conversion, intra-hour means, plausibility guards
//! ├── astro       — moon illumination, sunrise and sunset
//! ├── http        — Fetch trait + blocking reqwest client with retry
//! ├── ratelimit   — per-source minimum spacing between upstream calls
//! ├── ingest
//! │   ├── noaa    — CO-OPS datagetter: month windows, per-product reduction
//! │   ├── ndbc    — realtime2 text feeds: header lookup, hour averaging
//! │   ├── smn     — latest-observation JSON, recent hours only
//! │   └── fixtures (test only) — representative API response payloads
//! ├── aggregate   — per-hour record composition across the station pool
//! ├── output      — atomic year-partitioned hour files
//! ├── checkpoint  — append-only log of completed hours per job
//! ├── verify      — per-day completeness audit
//! ├── archive     — day/month tar.gz bundles
//! ├── driver      — backfill and realtime run loops
//! └── logging     — tracing subscriber setup
//! ```

pub mod aggregate;
pub mod archive;
pub mod astro;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod ratelimit;
pub mod stations;
pub mod units;
pub mod verify;
