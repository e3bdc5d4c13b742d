//! Logging setup.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Levels accepted by [`LogConfig::level`].
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level, one of [`LOG_LEVELS`] in any case.
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Checks the level is a known level name.
    pub fn validate(&self) -> SyncResult<()> {
        let level = self.level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(SyncError::Validation(format!(
                "unknown log level {:?}, expected one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }

    /// Builds the event filter for this configuration.
    pub fn filter(&self) -> SyncResult<EnvFilter> {
        EnvFilter::try_new(self.level.to_ascii_lowercase())
            .map_err(|e| SyncError::Config(format!("invalid log filter {:?}: {e}", self.level)))
    }
}

/// Installs the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> SyncResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter()?)
        .with_target(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| SyncError::Config(format!("logging already initialised: {e}")))
}
