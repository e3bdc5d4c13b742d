//! Job files.
//!
//! A job file holds the parameters of one or more operations in JSON or
//! YAML. Values set in the job file take precedence over the run
//! configuration, which takes precedence over built-in defaults.
//!
//! Unknown sections and fields are rejected rather than ignored.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::service::{HistoryOptions, SyncOptions};
use haystack_types::{RefName, TimeRange};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Serialization format of a job file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFormat {
    Json,
    Yaml,
}

impl JobFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> SyncResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(JobFormat::Json),
            Some("yaml" | "yml") => Ok(JobFormat::Yaml),
            other => Err(SyncError::JobFile(format!(
                "unsupported job file extension {:?}, use .json, .yaml or .yml",
                other.unwrap_or("")
            ))),
        }
    }
}

/// Parameters of an entity sync for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncJob {
    pub site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    /// Process only the first N points, sorted by refName.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl SyncJob {
    pub fn site(&self) -> SyncResult<RefName> {
        Ok(RefName::parse(&self.site)?)
    }

    /// Run options, with unset values taken from `config`.
    #[must_use]
    pub fn options(&self, config: &SyncConfig) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size.unwrap_or(config.batch_size),
            dry_run: self.dry_run.unwrap_or(config.dry_run),
            limit: self.limit,
            sync_all: self.sync_all.unwrap_or(config.sync_all),
        }
    }
}

/// Parameters of a reference sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncRefsJob {
    /// Restrict to one site; all sites when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl SyncRefsJob {
    pub fn site(&self) -> SyncResult<Option<RefName>> {
        self.site
            .as_deref()
            .map(RefName::parse)
            .transpose()
            .map_err(SyncError::from)
    }

    #[must_use]
    pub fn dry_run(&self, config: &SyncConfig) -> bool {
        self.dry_run.unwrap_or(config.dry_run)
    }
}

/// Parameters of a history write for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteHistoryJob {
    pub site: String,
    /// RFC 3339 instant or `YYYY-MM-DD`.
    pub start: String,
    /// RFC 3339 instant or `YYYY-MM-DD`.
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl WriteHistoryJob {
    pub fn site(&self) -> SyncResult<RefName> {
        Ok(RefName::parse(&self.site)?)
    }

    pub fn range(&self) -> SyncResult<TimeRange> {
        Ok(TimeRange::parse(&self.start, &self.end)?)
    }

    #[must_use]
    pub fn options(&self, config: &SyncConfig) -> HistoryOptions {
        HistoryOptions {
            chunk_size: self.chunk_size.unwrap_or(config.chunk_size),
            dry_run: self.dry_run.unwrap_or(config.dry_run),
            limit: self.limit,
            sync_all: config.sync_all,
        }
    }
}

/// A job file: any combination of the three operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_refs: Option<SyncRefsJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_history: Option<WriteHistoryJob>,
}

impl JobFile {
    /// Loads and validates a job file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let format = JobFormat::from_path(path)?;
        if !path.exists() {
            return Err(SyncError::JobFile(format!(
                "job file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Parses and validates job file content.
    pub fn parse(content: &str, format: JobFormat) -> SyncResult<Self> {
        let job: JobFile = match format {
            JobFormat::Json => serde_json::from_str(content)?,
            JobFormat::Yaml => serde_yaml::from_str(content)?,
        };
        job.validate()?;
        Ok(job)
    }

    /// Writes the job file, choosing the format by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        let content = self.render(JobFormat::from_path(path)?)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn render(&self, format: JobFormat) -> SyncResult<String> {
        Ok(match format {
            JobFormat::Json => serde_json::to_string_pretty(self)?,
            JobFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }

    /// Checks sizes and limits are positive and names and dates parse.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(job) = &self.sync {
            job.site()?;
            positive("sync.limit", job.limit)?;
            positive("sync.batch_size", job.batch_size)?;
        }
        if let Some(job) = &self.sync_refs {
            job.site()?;
        }
        if let Some(job) = &self.write_history {
            job.site()?;
            job.range()?;
            positive("write_history.limit", job.limit)?;
            positive("write_history.chunk_size", job.chunk_size)?;
        }
        Ok(())
    }

    /// A job file with every operation filled in with example values.
    #[must_use]
    pub fn template() -> Self {
        Self {
            sync: Some(SyncJob {
                site: "my-site-name".into(),
                dry_run: Some(false),
                limit: Some(100),
                sync_all: Some(false),
                batch_size: Some(crate::config::DEFAULT_BATCH_SIZE),
            }),
            sync_refs: Some(SyncRefsJob {
                site: Some("my-site-name".into()),
                dry_run: Some(false),
            }),
            write_history: Some(WriteHistoryJob {
                site: "my-site-name".into(),
                start: "2025-11-01".into(),
                end: "2025-11-02".into(),
                limit: None,
                chunk_size: Some(crate::config::DEFAULT_CHUNK_SIZE),
                dry_run: Some(false),
            }),
        }
    }
}

fn positive(field: &str, value: Option<usize>) -> SyncResult<()> {
    match value {
        Some(0) => Err(SyncError::Validation(format!("{field} must be positive"))),
        _ => Ok(()),
    }
}
