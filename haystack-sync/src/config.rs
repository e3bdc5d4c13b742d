//! Run configuration.

use crate::error::{SyncError, SyncResult};
use crate::logging::LogConfig;
use crate::merge::ManagedNamespace;
use haystack_types::validate_tag_name;
use serde::{Deserialize, Serialize};

/// Default number of entities per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default number of entities processed at once within a batch.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default number of samples per history chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Prefix of the environment variables read by [`SyncConfig::from_env`].
pub const ENV_PREFIX: &str = "HAYSTACK_SYNC_";

/// Configuration for sync runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entities per batch; refs are persisted after each batch.
    pub batch_size: usize,
    /// Entities processed concurrently within one batch.
    pub max_concurrent: usize,
    /// Samples per history chunk.
    pub chunk_size: usize,
    /// Compute everything, write nothing.
    pub dry_run: bool,
    /// Include points whose collection is disabled.
    pub sync_all: bool,
    /// Tags the source owns outright: removed from the sink when the source
    /// drops them.
    pub managed_tags: Vec<String>,
    /// Prefixes of source-owned tag names.
    pub managed_prefixes: Vec<String>,
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
            sync_all: false,
            managed_tags: ["dis", "unit", "tz", "kind"]
                .into_iter()
                .map(String::from)
                .collect(),
            managed_prefixes: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Rejects non-positive sizes, invalid managed tag names and unknown log
    /// levels.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("max_concurrent", self.max_concurrent),
            ("chunk_size", self.chunk_size),
        ] {
            if value == 0 {
                return Err(SyncError::Validation(format!("{name} must be positive")));
            }
        }
        for tag in &self.managed_tags {
            validate_tag_name(tag)?;
        }
        if self.managed_prefixes.iter().any(String::is_empty) {
            return Err(SyncError::Validation(
                "managed prefixes must not be empty".into(),
            ));
        }
        self.log.validate()
    }

    /// The managed tag namespace for merges.
    #[must_use]
    pub fn managed_namespace(&self) -> ManagedNamespace {
        ManagedNamespace::new(self.managed_tags.clone(), self.managed_prefixes.clone())
    }

    /// Reads configuration from `HAYSTACK_SYNC_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, which maps a full variable name
    /// to its value. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        let mut config = Self::default();
        if let Some((name, raw)) = var("BATCH_SIZE") {
            config.batch_size = parse_usize(&name, &raw)?;
        }
        if let Some((name, raw)) = var("MAX_CONCURRENT") {
            config.max_concurrent = parse_usize(&name, &raw)?;
        }
        if let Some((name, raw)) = var("CHUNK_SIZE") {
            config.chunk_size = parse_usize(&name, &raw)?;
        }
        if let Some((name, raw)) = var("DRY_RUN") {
            config.dry_run = parse_bool(&name, &raw)?;
        }
        if let Some((name, raw)) = var("SYNC_ALL") {
            config.sync_all = parse_bool(&name, &raw)?;
        }
        if let Some((_, raw)) = var("LOG_LEVEL") {
            config.log.level = raw;
        }
        if let Some((name, raw)) = var("LOG_JSON") {
            config.log.json = parse_bool(&name, &raw)?;
        }
        if let Some((_, raw)) = var("MANAGED_TAGS") {
            config.managed_tags = parse_list(&raw);
        }
        if let Some((_, raw)) = var("MANAGED_PREFIXES") {
            config.managed_prefixes = parse_list(&raw);
        }
        Ok(config)
    }
}

fn parse_usize(name: &str, raw: &str) -> SyncResult<usize> {
    raw.parse()
        .map_err(|_| SyncError::Config(format!("{name}: expected a non-negative integer, got {raw:?}")))
}

fn parse_bool(name: &str, raw: &str) -> SyncResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::Config(format!("{name}: expected a boolean, got {raw:?}"))),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
