//! Fetcher Adapter: the only seam to the remote platform
//!
//! The pipeline does not know how metadata is extracted or bytes are
//! transferred; it sees a [`Fetcher`] capability that resolves targets into a
//! lazy record sequence and materializes admitted records to local storage.
//! All transport failures are translated into [`FetchError`] here — nothing
//! downstream handles raw transport errors.

mod ytdlp;

pub use ytdlp::YtDlpFetcher;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FetchError;
use crate::types::{SourceTarget, VideoRecord};

/// Lazy sequence of records produced by resolving a target
///
/// User/hashtag feeds may be unbounded on the platform side; the stream pulls
/// one page at a time and the consumer decides when to stop.
pub type RecordStream = BoxStream<'static, Result<VideoRecord, FetchError>>;

/// Options for one materialize call
///
/// Deliberately a closed struct rather than an open-ended option bag: the
/// pipeline's needs are exactly these three knobs.
#[derive(Clone, Debug)]
pub struct MaterializeOptions {
    /// Also fetch the record's transcript, when it advertises one
    pub transcripts: bool,
    /// Directory to write media/transcript files under
    pub output_dir: PathBuf,
    /// Timeout for this attempt's transfers
    pub timeout: Duration,
}

/// Result of a successful materialize call
///
/// Media success with transcript failure is representable: the Download
/// Coordinator decides whether a failed transcript fails the record (it does
/// only when the policy requires transcripts).
#[derive(Clone, Debug)]
pub struct Materialized {
    /// Where the media bytes were written
    pub media_path: PathBuf,
    /// Where the transcript bytes were written, when fetched
    pub transcript_path: Option<PathBuf>,
    /// The transcript failure, when one was requested but could not be fetched
    pub transcript_error: Option<FetchError>,
}

/// Capability for talking to the remote platform
///
/// `resolve` failing means the target itself is unresolvable; an `Ok` stream
/// that yields nothing is a valid empty feed. The distinction comes from the
/// adapter — the pipeline never infers it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Lazily produce the records a target yields
    async fn resolve(&self, target: &SourceTarget) -> Result<RecordStream, FetchError>;

    /// Transfer a record's media (and optionally transcript) bytes to local
    /// storage; blocks until success or failure
    async fn materialize(
        &self,
        record: &VideoRecord,
        opts: &MaterializeOptions,
    ) -> Result<Materialized, FetchError>;
}
