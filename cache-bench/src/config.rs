//! Configuration for the in-process slab benchmark.

use serde::Deserialize;
use slab_engine::SlabCacheConfig;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: SlabCacheConfig,
    pub workload: WorkloadConfig,
}

/// General benchmark settings.
#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// How long to run the measurement phase.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// How long to warm up before recording metrics.
    #[serde(deserialize_with = "deserialize_duration")]
    pub warmup: Duration,
    /// Number of worker threads.
    pub threads: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, used when RUST_LOG is not set.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include timestamps.
    #[serde(default = "LoggingConfig::default_timestamps")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
            timestamps: Self::default_timestamps(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_timestamps() -> bool {
        true
    }
}

/// Workload configuration.
#[derive(Debug, Deserialize)]
pub struct WorkloadConfig {
    /// Whether to prefill the cache before measurement.
    #[serde(default)]
    pub prefill: bool,
    /// Item time-to-live. Zero means items never expire.
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    /// Keyspace parameters.
    pub keyspace: KeyspaceConfig,
    /// Command mix (must sum to 100).
    pub commands: CommandsConfig,
    /// Value parameters.
    pub values: ValuesConfig,
}

/// Keyspace configuration.
#[derive(Debug, Deserialize)]
pub struct KeyspaceConfig {
    /// Key length in bytes.
    pub length: usize,
    /// Number of distinct keys.
    pub count: usize,
}

/// Command mix (percentages, must sum to 100).
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    pub get: u8,
    pub set: u8,
    pub delete: u8,
}

/// Value configuration.
#[derive(Debug, Deserialize)]
pub struct ValuesConfig {
    /// Value length in bytes.
    pub length: usize,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(contents)?;

        // Validate command mix
        let total = config.workload.commands.get as u16
            + config.workload.commands.set as u16
            + config.workload.commands.delete as u16;
        if total != 100 {
            return Err(format!(
                "command mix must sum to 100 (got {}): get={} set={} delete={}",
                total,
                config.workload.commands.get,
                config.workload.commands.set,
                config.workload.commands.delete,
            )
            .into());
        }

        if config.general.threads == 0 {
            return Err("threads must be at least 1".into());
        }
        if config.workload.keyspace.length == 0 || config.workload.keyspace.length > 250 {
            return Err(format!(
                "key length must be between 1 and 250 (got {})",
                config.workload.keyspace.length
            )
            .into());
        }
        if config.workload.keyspace.count == 0 {
            return Err("keyspace count must be at least 1".into());
        }

        config.cache.validate()?;

        Ok(config)
    }

    /// Item expiration in engine seconds, 0 for no expiration.
    pub fn ttl_secs(&self) -> u32 {
        self.workload.ttl.as_secs().min(u32::MAX as u64) as u32
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "5m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
