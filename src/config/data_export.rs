use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest timezone offset accepted, in seconds (UTC±14:00).
pub const MAX_TIMEZONE_OFFSET_SECS: i64 = 14 * 3600;

/// Usage statistics export configuration.
///
/// When enabled, usage is accumulated in memory and flushed to the
/// `quota_data` table every `interval_minutes`. Query-time buckets are
/// aligned to local midnight using `timezone_offset_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataExportConfig {
    /// Enable recording and periodic flushing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Flush interval in minutes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Seconds east of UTC used to align day, week and month buckets.
    #[serde(default)]
    pub timezone_offset_secs: i64,
}

impl Default for DataExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            timezone_offset_secs: 0,
        }
    }
}

impl DataExportConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::Validation(
                "data_export.interval_minutes must be greater than 0".into(),
            ));
        }
        if self.timezone_offset_secs.abs() > MAX_TIMEZONE_OFFSET_SECS {
            return Err(ConfigError::Validation(format!(
                "data_export.timezone_offset_secs must be within ±{MAX_TIMEZONE_OFFSET_SECS}, got {}",
                self.timezone_offset_secs
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    1
}
