//! Configuration types for tiktok-dl
//!
//! The pipeline never reads configuration files itself; callers hand it a
//! fully resolved [`Settings`] value (a CLI or host application merges its
//! own option sources first).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::filter::FilterPolicy;

/// Default archive file name, placed under the output directory
const DEFAULT_ARCHIVE_FILE: &str = ".tiktok-dl-archive.txt";

/// Resolved settings for one pipeline run
///
/// Constructed once by the caller and passed to each component by parameter;
/// there is no ambient/global configuration lookup anywhere in the crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Directory downloaded media and transcripts are written to
    /// (default: "./downloads")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Admit only records with at least this many likes
    #[serde(default)]
    pub min_likes: Option<u64>,

    /// Admit only records with at least this many views
    #[serde(default)]
    pub min_views: Option<u64>,

    /// Admit only records uploaded on or after this date
    #[serde(default)]
    pub uploaded_after: Option<NaiveDate>,

    /// Fetch transcripts alongside media
    #[serde(default)]
    pub transcripts: bool,

    /// Require a transcript: records without one are not admitted, and a
    /// transcript fetch failure fails the whole record. Implies `transcripts`.
    #[serde(default)]
    pub require_transcript: bool,

    /// Fetch and report metadata without downloading anything
    #[serde(default)]
    pub metadata_only: bool,

    /// Download worker pool size (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Persisted dedup archive path (None disables cross-run dedup)
    #[serde(default)]
    pub archive_path: Option<PathBuf>,

    /// Write admitted records' metadata as JSON to this path after the run
    #[serde(default)]
    pub metadata_export: Option<PathBuf>,

    /// Timeout applied to each materialize attempt, including each retry
    /// (default: 60 seconds)
    #[serde(default = "default_materialize_timeout", with = "duration_serde")]
    pub materialize_timeout: Duration,

    /// Retry behavior for retryable fetch failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            min_likes: None,
            min_views: None,
            uploaded_after: None,
            transcripts: false,
            require_transcript: false,
            metadata_only: false,
            concurrency: default_concurrency(),
            archive_path: None,
            metadata_export: None,
            materialize_timeout: default_materialize_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Settings {
    /// Enable the persisted dedup archive at its conventional location
    /// under the output directory
    pub fn with_archive_in_output(mut self) -> Self {
        self.archive_path = Some(self.output_path.join(DEFAULT_ARCHIVE_FILE));
        self
    }

    /// The filter policy these settings imply
    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            min_likes: self.min_likes,
            min_views: self.min_views,
            uploaded_after: self.uploaded_after,
            require_transcript: self.require_transcript,
            metadata_only: self.metadata_only,
        }
    }

    /// Whether transcripts should be fetched during materialization
    pub fn transcripts_enabled(&self) -> bool {
        self.transcripts || self.require_transcript
    }

    /// Validate settings before a run
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("concurrency".to_string()),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }
        Ok(())
    }
}

/// Retry configuration for transient fetch failures
///
/// `max_attempts` is the TOTAL attempt ceiling: a record whose materialize
/// always fails retryably is attempted exactly `max_attempts` times before
/// being reported `Failed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempt ceiling per record (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_concurrency() -> usize {
    4
}

fn default_materialize_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds on the wire)
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
