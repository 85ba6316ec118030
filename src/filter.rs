//! Filter engine: pure, stateless admission checks
//!
//! A record is admitted iff every configured threshold is satisfied. The
//! checks are independent and order-free (logical AND, no side effects), so
//! admission is commutative over threshold evaluation order. A record missing
//! a metric required by an active threshold is not admitted — fail closed,
//! never an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::VideoRecord;

/// Admission thresholds for one run
///
/// Absent thresholds impose no constraint. `metadata_only` is carried here
/// because it is policy, but it does NOT affect admission — it only bypasses
/// the download stage downstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Minimum like count (inclusive)
    #[serde(default)]
    pub min_likes: Option<u64>,

    /// Minimum view count (inclusive)
    #[serde(default)]
    pub min_views: Option<u64>,

    /// Earliest admissible upload date (inclusive)
    #[serde(default)]
    pub uploaded_after: Option<NaiveDate>,

    /// Only admit records that advertise a transcript
    #[serde(default)]
    pub require_transcript: bool,

    /// Report admissions without downloading (no effect on admission itself)
    #[serde(default)]
    pub metadata_only: bool,
}

/// Evaluate whether a record passes every configured threshold
pub fn admits(record: &VideoRecord, policy: &FilterPolicy) -> bool {
    if let Some(min) = policy.min_likes {
        match record.like_count {
            Some(likes) if likes >= min => {}
            _ => return false,
        }
    }

    if let Some(min) = policy.min_views {
        match record.view_count {
            Some(views) if views >= min => {}
            _ => return false,
        }
    }

    if let Some(after) = policy.uploaded_after {
        match record.upload_date {
            Some(date) if date >= after => {}
            _ => return false,
        }
    }

    if policy.require_transcript && record.transcript_url.is_none() {
        return false;
    }

    true
}
