use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{errors::SamplerError, metric::MetricKind};

const DEFAULT_LOG_BASE_NAME: &str = "log";
const DEFAULT_METRIC: &str = "power";
const DEFAULT_INTERVAL_MS: u64 = 1000;

// Sampler configuration, stored as Json
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SamplerConfig {
    // Logs are written to "<log_base_name>_<index>.csv"
    pub log_base_name: String,
    pub metric: String,
    // Delay between two poll cycles
    pub interval_ms: u64,

    // Skip the samples already buffered by the driver
    // instead of backfilling them on the first poll
    pub resync_on_start: bool,
    // Log a snapshot of every device at start up
    pub report_on_start: bool,
}

impl SamplerConfig {
    // Load the configuration file, a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Configuration file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        debug!("Parsing config file at: {:?}", path);

        let file = File::open(path)
            .with_context(|| "Failed to open Json configuration file")?;

        let buf = BufReader::new(file);

        let config: SamplerConfig = serde_json::from_reader(buf)
            .with_context(|| "Failed to parse Json configuration file")?;

        Ok(config)
    }

    pub fn metric_kind(&self) -> Result<MetricKind, SamplerError> {
        self.metric.parse()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            log_base_name: DEFAULT_LOG_BASE_NAME.to_string(),
            metric: DEFAULT_METRIC.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            resync_on_start: false,
            report_on_start: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SamplerConfig::load(&dir.path().join("none.json")).unwrap();

        assert_eq!(config, SamplerConfig::default());
        assert_eq!(config.metric_kind().unwrap(), MetricKind::Power);
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"metric": "gpu_util", "interval_ms": 250}"#).unwrap();

        let config = SamplerConfig::load(&path).unwrap();
        assert_eq!(config.metric_kind().unwrap(), MetricKind::GpuUtilization);
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert_eq!(config.log_base_name, "log");
        assert!(!config.resync_on_start);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(SamplerConfig::load(&path).is_err());
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let config = SamplerConfig {
            metric: "encoder_util".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            config.metric_kind(),
            Err(SamplerError::UnsupportedMetric(_))
        ));
    }
}
