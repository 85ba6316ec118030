//! Shared test fixtures: a scriptable mock Fetcher
//!
//! `MockFetcher` lets unit tests script per-identifier materialize behavior
//! (failure sequences, latencies) and inspect attempt counts, without any
//! network or subprocess involvement. Successful materializations write real
//! files so filesystem-facing assertions (metadata-only writes nothing,
//! dedup priming sees prior output) stay honest.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::FetchError;
use crate::fetcher::{Fetcher, MaterializeOptions, Materialized, RecordStream};
use crate::types::{SourceTarget, VideoId, VideoRecord};

/// One scripted materialize attempt
#[derive(Clone, Debug)]
pub(crate) enum MockStep {
    /// Media (and transcript, when requested) succeed
    Succeed,
    /// Media succeeds but the transcript fetch fails
    TranscriptFails(FetchError),
    /// The whole attempt fails
    Fail(FetchError),
}

/// Scriptable in-memory Fetcher
#[derive(Default)]
pub(crate) struct MockFetcher {
    feeds: HashMap<String, Vec<VideoRecord>>,
    resolve_failures: HashMap<String, FetchError>,
    scripts: Mutex<HashMap<VideoId, VecDeque<MockStep>>>,
    latencies: HashMap<VideoId, Duration>,
    attempts: Mutex<HashMap<VideoId, u32>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a target resolves to
    pub(crate) fn with_feed(mut self, target: &str, records: Vec<VideoRecord>) -> Self {
        self.feeds.insert(target.to_string(), records);
        self
    }

    /// Make a target unresolvable
    pub(crate) fn with_resolve_failure(mut self, target: &str, error: FetchError) -> Self {
        self.resolve_failures.insert(target.to_string(), error);
        self
    }

    /// Script materialize attempts for an id; once the script runs dry,
    /// further attempts succeed
    pub(crate) fn with_script(mut self, id: &str, steps: Vec<MockStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(VideoId::new(id), steps.into());
        self
    }

    /// Delay every materialize attempt for an id
    pub(crate) fn with_latency(mut self, id: &str, latency: Duration) -> Self {
        self.latencies.insert(VideoId::new(id), latency);
        self
    }

    /// How many materialize attempts an id has seen
    pub(crate) fn attempts(&self, id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&VideoId::new(id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn resolve(&self, target: &SourceTarget) -> Result<RecordStream, FetchError> {
        if let Some(error) = self.resolve_failures.get(target.as_str()) {
            return Err(error.clone());
        }
        let records = self.feeds.get(target.as_str()).cloned().unwrap_or_default();
        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn materialize(
        &self,
        record: &VideoRecord,
        opts: &MaterializeOptions,
    ) -> Result<Materialized, FetchError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(record.id.clone())
            .or_insert(0) += 1;

        if let Some(latency) = self.latencies.get(&record.id) {
            tokio::time::sleep(*latency).await;
        }

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&record.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockStep::Succeed);

        let transcript_error = match step {
            MockStep::Fail(error) => return Err(error),
            MockStep::TranscriptFails(error) => Some(error),
            MockStep::Succeed => None,
        };

        tokio::fs::create_dir_all(&opts.output_dir).await.unwrap();
        let media_path = opts.output_dir.join(format!("video [{}].mp4", record.id));
        tokio::fs::write(&media_path, b"media").await.unwrap();

        let transcript_path = if opts.transcripts
            && record.transcript_url.is_some()
            && transcript_error.is_none()
        {
            let path = opts.output_dir.join(format!("video [{}].vtt", record.id));
            tokio::fs::write(&path, b"transcript").await.unwrap();
            Some(path)
        } else {
            None
        };

        Ok(Materialized {
            media_path,
            transcript_path,
            transcript_error,
        })
    }
}

/// Build a record with the given counts (None leaves the metric missing)
pub(crate) fn record(
    id: &str,
    likes: impl Into<Option<u64>>,
    views: impl Into<Option<u64>>,
) -> VideoRecord {
    VideoRecord {
        id: VideoId::new(id),
        title: Some(format!("video {id}")),
        author: Some("tester".to_string()),
        like_count: likes.into(),
        view_count: views.into(),
        webpage_url: format!("https://www.tiktok.com/@tester/video/{id}"),
        media_url: Some(format!("https://cdn.example.com/{id}.mp4")),
        transcript_url: None,
        upload_date: None,
    }
}

/// A record that advertises a transcript
pub(crate) fn record_with_transcript(
    id: &str,
    likes: impl Into<Option<u64>>,
    views: impl Into<Option<u64>>,
) -> VideoRecord {
    let mut r = record(id, likes, views);
    r.transcript_url = Some(format!("https://cdn.example.com/{id}.vtt"));
    r
}

/// Fast retry settings for tests (no jitter, millisecond delays)
pub(crate) fn quick_retry(max_attempts: u32) -> crate::config::RetryConfig {
    crate::config::RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}
