//! Core types for tiktok-dl

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FetchError, FetchErrorKind};

/// Platform-assigned unique identifier for a video
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create a new VideoId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VideoId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VideoId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VideoId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Kind of a source target, as classified by the Fetcher Adapter
///
/// The pipeline never infers the kind itself; classification is lazy and
/// belongs to the adapter (a single-video target yields at most one record,
/// user/hashtag feeds paginate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single video page
    Video,
    /// A user/creator feed
    User,
    /// A hashtag feed
    Hashtag,
}

/// One user-supplied source reference (a video, user, or hashtag URL)
///
/// Immutable once created. Construction validates that the reference is a
/// well-formed http(s) URL; everything beyond that (existence, kind) is the
/// Fetcher Adapter's business.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTarget {
    raw: String,
}

impl SourceTarget {
    /// Parse and validate a raw target reference
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let trimmed = raw.trim();
        let parsed = url::Url::parse(trimmed).map_err(|e| {
            crate::error::Error::TargetResolution(format!("invalid target URL '{trimmed}': {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(crate::error::Error::TargetResolution(format!(
                "unsupported URL scheme '{}' in target '{trimmed}'",
                parsed.scheme()
            )));
        }
        Ok(Self {
            raw: trimmed.to_string(),
        })
    }

    /// The validated raw reference string
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Parse targets from one-URL-per-line text (blank lines skipped)
///
/// Invalid lines are logged and dropped rather than failing the batch; an
/// all-invalid input simply produces an empty vec, which the pipeline treats
/// as fatal at run start.
pub fn targets_from_lines(content: &str) -> Vec<SourceTarget> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match SourceTarget::parse(line) {
            Ok(target) => Some(target),
            Err(e) => {
                tracing::warn!(line, error = %e, "Skipping unparseable target line");
                None
            }
        })
        .collect()
}

/// One candidate unit of work, produced by the Fetcher Adapter
///
/// Read-only after production. Multiple targets may yield records with the
/// same identifier (overlapping feeds); uniqueness is the Dedup Ledger's job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Platform-assigned unique identifier
    pub id: VideoId,
    /// Video title, when the platform exposes one
    pub title: Option<String>,
    /// Author handle
    pub author: Option<String>,
    /// Like count at fetch time
    pub like_count: Option<u64>,
    /// View count at fetch time
    pub view_count: Option<u64>,
    /// Canonical page URL for the video
    pub webpage_url: String,
    /// Direct media download URL, when the extractor exposes one
    pub media_url: Option<String>,
    /// Transcript/subtitle download URL, when available
    pub transcript_url: Option<String>,
    /// Upload date, when the platform exposes one
    pub upload_date: Option<NaiveDate>,
}

/// Why an admitted record was skipped instead of downloaded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Metadata-only mode: downloads are bypassed entirely
    MetadataOnly,
    /// The run was cancelled before this record was dispatched
    Cancelled,
    /// The identifier was already processed (in-run or persisted archive)
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::MetadataOnly => "metadata_only",
            SkipReason::Cancelled => "cancelled",
            SkipReason::Duplicate => "duplicate",
        };
        write!(f, "{s}")
    }
}

/// Terminal status of one admitted record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Media (and transcript, when fetched) persisted to local storage
    Saved,
    /// No download attempted
    Skipped {
        /// Why the record was skipped
        reason: SkipReason,
    },
    /// Download attempted and failed terminally
    Failed {
        /// Classification of the final error
        kind: FetchErrorKind,
        /// Description of the final error
        reason: String,
    },
}

/// One terminal result per admitted record
///
/// Created exactly once per identifier per run and never mutated afterward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// The record's identifier
    pub id: VideoId,
    /// Terminal status
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Where the media bytes were written (Saved only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_path: Option<PathBuf>,
    /// Where the transcript bytes were written, when fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
}

impl DownloadOutcome {
    /// A successful download
    pub fn saved(id: VideoId, media_path: PathBuf, transcript_path: Option<PathBuf>) -> Self {
        Self {
            id,
            status: OutcomeStatus::Saved,
            media_path: Some(media_path),
            transcript_path,
        }
    }

    /// A skipped record
    pub fn skipped(id: VideoId, reason: SkipReason) -> Self {
        Self {
            id,
            status: OutcomeStatus::Skipped { reason },
            media_path: None,
            transcript_path: None,
        }
    }

    /// A terminally failed record
    pub fn failed(id: VideoId, error: &FetchError) -> Self {
        Self {
            id,
            status: OutcomeStatus::Failed {
                kind: error.kind,
                reason: error.message.clone(),
            },
            media_path: None,
            transcript_path: None,
        }
    }
}

/// Aggregate result of one pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Total records produced by all resolved targets
    pub total_fetched: usize,
    /// Records that passed the filter policy
    pub total_admitted: usize,
    /// One outcome per admitted record, in admission order
    pub outcomes: Vec<DownloadOutcome>,
    /// Wall-clock duration of the run
    #[serde(with = "crate::config::duration_serde")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Number of `Saved` outcomes
    pub fn saved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Saved))
            .count()
    }

    /// Number of `Skipped` outcomes
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Skipped { .. }))
            .count()
    }

    /// Number of `Failed` outcomes
    ///
    /// A wrapping CLI typically exits nonzero when this is nonzero.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
            .count()
    }
}

/// Event emitted during a pipeline run
///
/// Consumers subscribe via [`crate::pipeline::Pipeline::subscribe`]; no
/// polling required.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A target resolved into a (possibly empty) record feed
    TargetResolved {
        /// The target's raw reference
        target: String,
        /// Number of records the feed produced
        records: usize,
    },

    /// A target could not be resolved (non-fatal unless all targets fail)
    TargetFailed {
        /// The target's raw reference
        target: String,
        /// Description of the resolution failure
        error: String,
    },

    /// Metadata collection finished
    MetadataFetched {
        /// Total records fetched across all targets
        total: usize,
    },

    /// A record passed the filter policy
    Admitted {
        /// The record's identifier
        id: VideoId,
        /// The record's title, when known
        title: Option<String>,
    },

    /// A record's media was persisted
    Saved {
        /// The record's identifier
        id: VideoId,
        /// Where the media bytes were written
        media_path: PathBuf,
    },

    /// An admitted record was skipped
    Skipped {
        /// The record's identifier
        id: VideoId,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// An admitted record failed terminally
    Failed {
        /// The record's identifier
        id: VideoId,
        /// Description of the final error
        error: String,
    },

    /// The run finished and the report is available
    RunComplete {
        /// Number of Saved outcomes
        saved: usize,
        /// Number of Skipped outcomes
        skipped: usize,
        /// Number of Failed outcomes
        failed: usize,
    },
}
