//! Service configuration loader - parses marinemon.toml
//!
//! Keeps deployment specifics (directories, rate limits, lookback windows,
//! upstream endpoints) out of the code. Every key has a default, so an empty
//! file reproduces the reference deployment. Secrets are never stored here:
//! the SMN token is read from the environment (a `.env` file is honoured).

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::Source;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "marinemon.toml";

/// Root configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Product name used in hour file names (`{product}_{YYYYMMDD}T{HH}Z.jsonl`).
    pub product: String,
    /// Root of the year-partitioned output tree.
    pub output_dir: PathBuf,
    /// Directory holding per-job checkpoint logs.
    pub checkpoint_dir: PathBuf,
    /// Pipe-delimited station list.
    pub stations_file: PathBuf,
    /// Station workers per hour.
    pub workers: usize,
    /// Omit null-valued keys from emitted records.
    pub remove_nulls: bool,
    /// Bundle each completed day's hour files and remove the originals.
    pub archive_completed_days: bool,
    /// Realtime mode also revisits this many hours before its target, so a
    /// missed cron invocation is caught up by the next one.
    pub realtime_catchup_hours: i64,

    pub reference_location: ReferenceLocation,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            product: "marine_obs".to_string(),
            output_dir: PathBuf::from("data"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            stations_file: PathBuf::from("stations.list"),
            workers: 4,
            remove_nulls: false,
            archive_completed_days: false,
            realtime_catchup_hours: 24,
            reference_location: ReferenceLocation::default(),
            http: HttpConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

/// Location the astronomical fields are computed for.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for ReferenceLocation {
    fn default() -> Self {
        Self {
            name: "Mar del Plata".to_string(),
            latitude: -38.0055,
            longitude: -57.5426,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Extra attempts after the first, for transport errors and 5xx only.
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 2,
            retry_delay_ms: 1000,
            user_agent: concat!("marinemon_service/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Each `[sources.*]` table overrides only the keys it names; the rest keep
/// that source's reference values.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "SourcesFile")]
pub struct SourcesConfig {
    pub noaa: SourceConfig,
    pub ndbc: SourceConfig,
    pub smn: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            noaa: SourceConfig {
                base_url: "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter".to_string(),
                min_interval_ms: 1500,
                lookback_hours: 3,
                ..SourceConfig::default()
            },
            ndbc: SourceConfig {
                base_url: "https://www.ndbc.noaa.gov/data/realtime2".to_string(),
                min_interval_ms: 2000,
                lookback_hours: 1,
                feed_cache_secs: 600,
                ..SourceConfig::default()
            },
            smn: SourceConfig {
                base_url: "https://ws1.smn.gob.ar/v1".to_string(),
                min_interval_ms: 2500,
                lookback_hours: 1,
                token_env: Some("SMN_API_TOKEN".to_string()),
                valid_hours: 3,
                ..SourceConfig::default()
            },
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, source: Source) -> &SourceConfig {
        match source {
            Source::Noaa => &self.noaa,
            Source::Ndbc => &self.ndbc,
            Source::Smn => &self.smn,
        }
    }
}

/// `[sources]` as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourcesFile {
    noaa: SourceOverrides,
    ndbc: SourceOverrides,
    smn: SourceOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceOverrides {
    base_url: Option<String>,
    min_interval_ms: Option<u64>,
    lookback_hours: Option<i64>,
    feed_cache_secs: Option<u64>,
    token_env: Option<String>,
    valid_hours: Option<i64>,
}

impl SourceOverrides {
    fn apply(self, base: SourceConfig) -> SourceConfig {
        SourceConfig {
            base_url: self.base_url.unwrap_or(base.base_url),
            min_interval_ms: self.min_interval_ms.unwrap_or(base.min_interval_ms),
            lookback_hours: self.lookback_hours.unwrap_or(base.lookback_hours),
            feed_cache_secs: self.feed_cache_secs.unwrap_or(base.feed_cache_secs),
            token_env: self.token_env.or(base.token_env),
            valid_hours: self.valid_hours.unwrap_or(base.valid_hours),
        }
    }
}

impl From<SourcesFile> for SourcesConfig {
    fn from(file: SourcesFile) -> Self {
        let reference = SourcesConfig::default();
        Self {
            noaa: file.noaa.apply(reference.noaa),
            ndbc: file.ndbc.apply(reference.ndbc),
            smn: file.smn.apply(reference.smn),
        }
    }
}

/// Per-source settings. Keys a source does not use are ignored.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    /// Minimum spacing between the starts of two calls to this source.
    pub min_interval_ms: u64,
    /// Publication latency; real-time mode looks this far back.
    pub lookback_hours: i64,
    /// NDBC: how long a downloaded feed is reused.
    pub feed_cache_secs: u64,
    /// Environment variable holding the bearer token, if the source needs one.
    pub token_env: Option<String>,
    /// SMN: how old an hour may be and still be served by the latest reading.
    pub valid_hours: i64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            min_interval_ms: 2000,
            lookback_hours: 1,
            feed_cache_secs: 0,
            token_env: None,
            valid_hours: 0,
        }
    }
}

impl SourceConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Resolves the bearer token from the environment.
    ///
    /// `Ok(None)` when the source needs no token; `Err` names the missing
    /// variable when it does.
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        let Some(var) = &self.token_env else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
            _ => Err(ConfigError::Invalid(format!("environment variable {} is not set", var))),
        }
    }
}

impl AppConfig {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`. A missing file at the default
    /// location yields the built-in defaults; a missing explicit path is an
    /// error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(AppConfig::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.product.is_empty()
            || !self
                .product
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "product '{}' must be non-empty alphanumeric/underscore/hyphen",
                self.product
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.realtime_catchup_hours < 0 {
            return Err(ConfigError::Invalid("realtime_catchup_hours must not be negative".to_string()));
        }
        if !(-90.0..=90.0).contains(&self.reference_location.latitude)
            || !(-180.0..=180.0).contains(&self.reference_location.longitude)
        {
            return Err(ConfigError::Invalid(
                "reference_location latitude/longitude out of range".to_string(),
            ));
        }
        for source in Source::ALL {
            let cfg = self.sources.get(source);
            if cfg.base_url.is_empty() {
                return Err(ConfigError::Invalid(format!("sources.{} base_url is empty", source)));
            }
            if cfg.lookback_hours < 0 {
                return Err(ConfigError::Invalid(format!(
                    "sources.{} lookback_hours must not be negative",
                    source
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_reference_deployment() {
        let config = AppConfig::from_toml("", Path::new("inline")).unwrap();
        assert_eq!(config.product, "marine_obs");
        assert_eq!(config.sources.noaa.min_interval_ms, 1500);
        assert_eq!(config.sources.ndbc.min_interval_ms, 2000);
        assert_eq!(config.sources.smn.min_interval_ms, 2500);
        assert_eq!(config.sources.smn.token_env.as_deref(), Some("SMN_API_TOKEN"));
        assert!(!config.remove_nulls);
    }

    #[test]
    fn test_partial_source_section_keeps_other_defaults() {
        let toml = r#"
            product = "coastal"
            workers = 2

            [sources.noaa]
            base_url = "http://localhost:9000/noaa"
            min_interval_ms = 10
        "#;
        let config = AppConfig::from_toml(toml, Path::new("inline")).unwrap();
        assert_eq!(config.product, "coastal");
        assert_eq!(config.workers, 2);
        assert_eq!(config.sources.noaa.base_url, "http://localhost:9000/noaa");
        assert_eq!(config.sources.noaa.min_interval(), Duration::from_millis(10));
        assert_eq!(config.sources.noaa.lookback_hours, 3);
        assert_eq!(config.sources.ndbc.min_interval_ms, 2000);
    }

    #[test]
    fn test_partial_smn_section_keeps_token_and_validity_window() {
        let toml = r#"
            [sources.smn]
            min_interval_ms = 5000
        "#;
        let config = AppConfig::from_toml(toml, Path::new("inline")).unwrap();
        let smn = &config.sources.smn;
        assert_eq!(smn.min_interval_ms, 5000);
        assert_eq!(smn.token_env.as_deref(), Some("SMN_API_TOKEN"));
        assert_eq!(smn.valid_hours, 3);
        assert_eq!(smn.base_url, "https://ws1.smn.gob.ar/v1");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = AppConfig::from_toml("workers = 0", Path::new("inline")).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_rejects_product_with_path_separator() {
        assert!(AppConfig::from_toml(r#"product = "a/b""#, Path::new("inline")).is_err());
    }

    #[test]
    fn test_malformed_toml_reports_origin() {
        let err = AppConfig::from_toml("workers = [", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_source_without_token_env_needs_no_token() {
        let config = AppConfig::default();
        assert_eq!(config.sources.ndbc.resolve_token().unwrap(), None);
    }

    #[test]
    fn test_missing_token_variable_is_config_error() {
        let source = SourceConfig {
            token_env: Some("MARINEMON_TEST_TOKEN_THAT_IS_NEVER_SET".to_string()),
            ..SourceConfig::default()
        };
        let err = source.resolve_token().unwrap_err();
        assert!(err.to_string().contains("MARINEMON_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_repository_config_file_parses() {
        let config = AppConfig::load(Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        assert!(config.workers >= 1);
        assert_eq!(config.sources.noaa.lookback_hours, 3);
    }
}
