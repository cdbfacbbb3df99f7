use hivemon_alert::rule::RuleConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Seconds between scheduled rule evaluations.
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    /// Seconds between scheduled anomaly detection runs.
    #[serde(default = "default_anomaly_interval_secs")]
    pub anomaly_interval_secs: u64,
    /// How far back rule evaluation looks for a metric's latest sample.
    #[serde(default = "default_rule_lookback_secs")]
    pub rule_lookback_secs: u64,
    #[serde(default = "default_detection_window_secs")]
    pub detection_window_secs: u64,
    #[serde(default = "default_anomaly_history_capacity")]
    pub anomaly_history_capacity: usize,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_true")]
    pub seed_default_rules: bool,
    #[serde(default = "default_true")]
    pub seed_default_detectors: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Extra rules declared in the config file, added after the defaults.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory holding the daily SQLite partitions.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_evaluation_interval_secs() -> u64 {
    30
}

fn default_anomaly_interval_secs() -> u64 {
    60
}

fn default_rule_lookback_secs() -> u64 {
    300
}

fn default_detection_window_secs() -> u64 {
    3600
}

fn default_anomaly_history_capacity() -> usize {
    1000
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: default_evaluation_interval_secs(),
            anomaly_interval_secs: default_anomaly_interval_secs(),
            rule_lookback_secs: default_rule_lookback_secs(),
            detection_window_secs: default_detection_window_secs(),
            anomaly_history_capacity: default_anomaly_history_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
            seed_default_rules: true,
            seed_default_detectors: true,
            storage: StorageConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero intervals, which would make the schedulers spin.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.evaluation_interval_secs == 0 {
            anyhow::bail!("evaluation_interval_secs must be greater than 0");
        }
        if self.anomaly_interval_secs == 0 {
            anyhow::bail!("anomaly_interval_secs must be greater than 0");
        }
        if self.storage.cleanup_interval_secs == 0 {
            anyhow::bail!("storage.cleanup_interval_secs must be greater than 0");
        }
        Ok(())
    }
}
