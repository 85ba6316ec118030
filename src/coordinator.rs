//! Download coordinator: bounded-concurrency execution of admitted records
//!
//! A fixed pool of worker tasks pulls jobs from a shared queue — no unbounded
//! fan-out against a rate-limited platform. Each job produces exactly one
//! [`DownloadOutcome`]; completion order across workers is free, but the
//! returned outcome list is sorted back into admission order so reports are
//! deterministic.
//!
//! Rate-limit responses arm a pool-wide backoff gate in addition to the
//! per-record retry: every worker waits out the shared deadline before
//! dispatching its next job, temporarily shrinking effective concurrency
//! instead of amplifying the throttling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{FetchError, FetchErrorKind};
use crate::fetcher::{Fetcher, MaterializeOptions};
use crate::retry::fetch_with_retry;
use crate::types::{DownloadOutcome, Event, OutcomeStatus, SkipReason, VideoRecord};

/// Pool-wide backoff gate armed by rate-limit responses
///
/// `throttle` pushes a shared deadline forward; `wait_ready` parks the caller
/// until the deadline has passed. Workers consult the gate between jobs, so a
/// single 429 slows the whole pool down rather than just one record's retry.
#[derive(Debug, Default)]
pub(crate) struct RateLimitGate {
    until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    /// Arm (or extend) the backoff deadline
    pub(crate) async fn throttle(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut until = self.until.lock().await;
        if until.is_none_or(|u| deadline > u) {
            *until = Some(deadline);
            tracing::warn!(
                delay_ms = delay.as_millis(),
                "Rate limited: backing off the whole worker pool"
            );
        }
    }

    /// Wait until no backoff deadline is pending
    pub(crate) async fn wait_ready(&self) {
        loop {
            let pending = {
                let mut until = self.until.lock().await;
                match *until {
                    Some(deadline) if deadline > Instant::now() => Some(deadline),
                    Some(_) => {
                        *until = None;
                        None
                    }
                    None => None,
                }
            };
            match pending {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => return,
            }
        }
    }
}

type JobQueue = Arc<Mutex<VecDeque<(usize, VideoRecord)>>>;

/// Bounded-concurrency executor for admitted, deduplicated records
#[derive(Clone)]
pub struct DownloadCoordinator {
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<Settings>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl DownloadCoordinator {
    /// Create a coordinator sharing the pipeline's fetcher, settings, event
    /// channel and cancellation token
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        settings: Arc<Settings>,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            settings,
            event_tx,
            cancel,
        }
    }

    /// Produce exactly one outcome per record, in input order
    ///
    /// In metadata-only mode every record is skipped without touching the
    /// fetcher and no files are written. On cancellation, in-flight attempts
    /// finish (or time out) and undispatched records drain as
    /// `Skipped{cancelled}`.
    pub async fn run(&self, records: Vec<VideoRecord>) -> Vec<DownloadOutcome> {
        if records.is_empty() {
            return Vec::new();
        }

        if self.settings.metadata_only {
            return records
                .into_iter()
                .map(|record| {
                    self.emit(Event::Skipped {
                        id: record.id.clone(),
                        reason: SkipReason::MetadataOnly,
                    });
                    DownloadOutcome::skipped(record.id, SkipReason::MetadataOnly)
                })
                .collect();
        }

        let total = records.len();
        let queue: JobQueue = Arc::new(Mutex::new(records.into_iter().enumerate().collect()));
        let gate = Arc::new(RateLimitGate::default());
        // Capacity covers every job so workers never block on send
        let (tx, mut rx) = mpsc::channel::<(usize, DownloadOutcome)>(total);

        let workers = self.settings.concurrency.min(total).max(1);
        tracing::info!(jobs = total, workers, "Starting download workers");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let coordinator = self.clone();
            let queue = Arc::clone(&queue);
            let gate = Arc::clone(&gate);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                coordinator.worker_loop(worker, queue, gate, tx).await;
            }));
        }
        drop(tx);

        for handle in handles {
            let _ = handle.await;
        }

        let mut indexed = Vec::with_capacity(total);
        while let Some(pair) = rx.recv().await {
            indexed.push(pair);
        }

        // Whatever is still queued was never dispatched: the run was cancelled
        let leftover: Vec<(usize, VideoRecord)> = queue.lock().await.drain(..).collect();
        for (index, record) in leftover {
            self.emit(Event::Skipped {
                id: record.id.clone(),
                reason: SkipReason::Cancelled,
            });
            indexed.push((index, DownloadOutcome::skipped(record.id, SkipReason::Cancelled)));
        }

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn worker_loop(
        &self,
        worker: usize,
        queue: JobQueue,
        gate: Arc<RateLimitGate>,
        tx: mpsc::Sender<(usize, DownloadOutcome)>,
    ) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some((index, record)) = queue.lock().await.pop_front() else {
                break;
            };

            // Honor the pool-wide backoff before dispatching; cancellation
            // while parked puts the job back for the drain pass.
            tokio::select! {
                _ = gate.wait_ready() => {}
                _ = self.cancel.cancelled() => {
                    queue.lock().await.push_front((index, record));
                    break;
                }
            }

            tracing::debug!(worker, id = %record.id, "Dispatching download");
            let outcome = self.process(&record, &gate).await;

            match &outcome.status {
                OutcomeStatus::Saved => {
                    if let Some(path) = &outcome.media_path {
                        self.emit(Event::Saved {
                            id: outcome.id.clone(),
                            media_path: path.clone(),
                        });
                    }
                }
                OutcomeStatus::Failed { reason, .. } => {
                    self.emit(Event::Failed {
                        id: outcome.id.clone(),
                        error: reason.clone(),
                    });
                }
                OutcomeStatus::Skipped { reason } => {
                    self.emit(Event::Skipped {
                        id: outcome.id.clone(),
                        reason: *reason,
                    });
                }
            }

            if tx.send((index, outcome)).await.is_err() {
                break;
            }
        }
    }

    /// Run one record through timeout, retry and transcript policy
    async fn process(&self, record: &VideoRecord, gate: &Arc<RateLimitGate>) -> DownloadOutcome {
        let opts = MaterializeOptions {
            transcripts: self.settings.transcripts_enabled(),
            output_dir: self.settings.output_path.clone(),
            timeout: self.settings.materialize_timeout,
        };

        let result = fetch_with_retry(&self.settings.retry, || {
            let fetcher = Arc::clone(&self.fetcher);
            let record = record.clone();
            let opts = opts.clone();
            let gate = Arc::clone(gate);
            let backoff = self.settings.retry.initial_delay;
            async move {
                // Each attempt, including each retry, gets its own timeout
                let attempt =
                    match tokio::time::timeout(opts.timeout, fetcher.materialize(&record, &opts))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::network(format!(
                            "materialize attempt exceeded {}s",
                            opts.timeout.as_secs()
                        ))),
                    };
                if let Err(e) = &attempt
                    && e.kind == FetchErrorKind::RateLimited
                {
                    gate.throttle(backoff).await;
                }
                attempt
            }
        })
        .await;

        match result {
            Ok(materialized) => {
                if let Some(transcript_error) = &materialized.transcript_error
                    && self.settings.require_transcript
                {
                    let error = FetchError {
                        kind: transcript_error.kind,
                        retryable: transcript_error.retryable,
                        message: format!(
                            "required transcript unavailable: {}",
                            transcript_error.message
                        ),
                    };
                    return DownloadOutcome::failed(record.id.clone(), &error);
                }
                DownloadOutcome::saved(
                    record.id.clone(),
                    materialized.media_path,
                    materialized.transcript_path,
                )
            }
            Err(error) => DownloadOutcome::failed(record.id.clone(), &error),
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}
