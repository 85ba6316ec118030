//! Pipeline orchestrator: resolve → fetch → filter → dedup → download → report
//!
//! Data flows strictly forward; no stage reaches back upstream. The stages
//! before the download pool run sequentially on the coordinating task, and the
//! per-run state machine is one-way:
//!
//! `Idle → ResolvingTargets → FetchingMetadata → Filtering → Downloading →
//! Aggregating → Done`, with `Failed` as the terminal state when no target
//! can be resolved (or another fatal error occurs before a report exists).
//!
//! Per-record failures never abort a run — they surface as `Failed` outcomes
//! in the report.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::coordinator::DownloadCoordinator;
use crate::error::{Error, Result};
use crate::export;
use crate::fetcher::Fetcher;
use crate::filter;
use crate::ledger::DedupLedger;
use crate::types::{
    DownloadOutcome, Event, OutcomeStatus, RunReport, SkipReason, SourceTarget, VideoRecord,
};

/// Orchestrator run state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started
    Idle,
    /// Validating the supplied targets
    ResolvingTargets,
    /// Consuming record feeds from the Fetcher Adapter
    FetchingMetadata,
    /// Evaluating the filter policy and deduplicating
    Filtering,
    /// Download workers are running
    Downloading,
    /// Assembling the run report
    Aggregating,
    /// Report available (regardless of individual outcome statuses)
    Done,
    /// Fatal error, no report
    Failed,
}

/// The acquisition pipeline for one run
///
/// Owns the run's settings, event channel, state machine and cancellation
/// token; each instance runs once. All shared state is `Arc`-wrapped, so the
/// pipeline can be observed (events, state) from other tasks while running.
pub struct Pipeline {
    settings: Arc<Settings>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: broadcast::Sender<Event>,
    state_tx: watch::Sender<RunState>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline from resolved settings and a fetcher capability
    pub fn new(settings: Settings, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        settings.validate()?;
        let (event_tx, _rx) = broadcast::channel(1024);
        let (state_tx, _rx) = watch::channel(RunState::Idle);
        tracing::debug!(fetcher = fetcher.name(), "Pipeline created");
        Ok(Self {
            settings: Arc::new(settings),
            fetcher,
            event_tx,
            state_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Watch run state transitions
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// The run's cancellation token
    ///
    /// Cancelling closes the work queue: no new downloads are dispatched,
    /// in-flight transfers finish or time out, and undispatched admitted
    /// records are reported as `Skipped{cancelled}`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Execute the pipeline over the supplied targets
    ///
    /// Returns the run report on success. The only run-fatal conditions are
    /// an empty target list and a target list where nothing resolves; a
    /// resolvable target with an empty feed yields a successful empty report.
    pub async fn run(&self, targets: Vec<SourceTarget>) -> Result<RunReport> {
        if self.state() != RunState::Idle {
            return Err(Error::AlreadyRan);
        }
        match self.run_inner(targets).await {
            Ok(report) => {
                self.set_state(RunState::Done);
                Ok(report)
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn run_inner(&self, targets: Vec<SourceTarget>) -> Result<RunReport> {
        let started_at = chrono::Utc::now();
        let started = Instant::now();

        self.set_state(RunState::ResolvingTargets);
        if targets.is_empty() {
            return Err(Error::TargetResolution("no targets supplied".to_string()));
        }
        tokio::fs::create_dir_all(&self.settings.output_path).await?;

        let ledger = DedupLedger::new();
        if let Some(archive) = &self.settings.archive_path {
            if let Err(e) = ledger.load_archive(archive).await {
                tracing::warn!(archive = %archive.display(), error = %e, "Could not load dedup archive");
            }
            if let Err(e) = ledger.prime_from_dir(&self.settings.output_path).await {
                tracing::warn!(error = %e, "Could not prime ledger from output directory");
            }
        }

        self.set_state(RunState::FetchingMetadata);
        let records = self.fetch_metadata(&targets).await?;
        self.emit(Event::MetadataFetched {
            total: records.len(),
        });
        tracing::info!(
            targets = targets.len(),
            records = records.len(),
            "Metadata collection finished"
        );

        self.set_state(RunState::Filtering);
        let policy = self.settings.filter_policy();
        let admitted: Vec<VideoRecord> = records
            .iter()
            .filter(|record| filter::admits(record, &policy))
            .cloned()
            .collect();
        for record in &admitted {
            self.emit(Event::Admitted {
                id: record.id.clone(),
                title: record.title.clone(),
            });
        }
        tracing::info!(
            fetched = records.len(),
            admitted = admitted.len(),
            "Filter policy applied"
        );

        // Dedup at admission time: an identifier is marked before any
        // download begins, so overlapping feeds cannot double-download it.
        // Metadata-only runs admit nothing "for download" and skip the ledger.
        let mut is_duplicate = vec![false; admitted.len()];
        if !self.settings.metadata_only {
            for (slot, record) in is_duplicate.iter_mut().zip(&admitted) {
                *slot = !ledger.mark(&record.id).await;
            }
        }
        let to_download: Vec<VideoRecord> = admitted
            .iter()
            .zip(&is_duplicate)
            .filter(|(_, dup)| !**dup)
            .map(|(record, _)| record.clone())
            .collect();

        self.set_state(RunState::Downloading);
        let coordinator = DownloadCoordinator::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.settings),
            self.event_tx.clone(),
            self.cancel.clone(),
        );
        let downloaded = coordinator.run(to_download).await;

        self.set_state(RunState::Aggregating);
        let outcomes = self.merge_outcomes(&admitted, &is_duplicate, downloaded);

        if !self.settings.metadata_only {
            // Failed and cancelled records stay eligible for future runs
            for outcome in &outcomes {
                match &outcome.status {
                    OutcomeStatus::Failed { .. }
                    | OutcomeStatus::Skipped {
                        reason: SkipReason::Cancelled,
                    } => ledger.forget(&outcome.id).await,
                    _ => {}
                }
            }
            if let Some(archive) = &self.settings.archive_path
                && let Err(e) = ledger.flush_archive(archive).await
            {
                tracing::warn!(archive = %archive.display(), error = %e, "Could not flush dedup archive");
            }
        }

        if let Some(path) = &self.settings.metadata_export
            && let Err(e) = export::write_metadata_json(&admitted, path).await
        {
            tracing::error!(path = %path.display(), error = %e, "Metadata export failed");
        }

        let report = RunReport {
            started_at,
            total_fetched: records.len(),
            total_admitted: admitted.len(),
            outcomes,
            elapsed: started.elapsed(),
        };
        self.emit(Event::RunComplete {
            saved: report.saved(),
            skipped: report.skipped(),
            failed: report.failed(),
        });
        tracing::info!(
            saved = report.saved(),
            skipped = report.skipped(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis(),
            "Run complete"
        );
        Ok(report)
    }

    /// Resolve each target and drain its record feed
    ///
    /// Per-target resolution failures are logged and skipped; the run is
    /// fatal only when not a single target resolves.
    async fn fetch_metadata(&self, targets: &[SourceTarget]) -> Result<Vec<VideoRecord>> {
        let mut records = Vec::new();
        let mut resolved = 0usize;
        let mut last_error: Option<String> = None;

        for target in targets {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancelled: skipping remaining targets");
                break;
            }
            match self.fetcher.resolve(target).await {
                Ok(mut stream) => {
                    resolved += 1;
                    let before = records.len();
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(record) => records.push(record),
                            Err(e) => {
                                tracing::warn!(target = %target, error = %e, "Record feed interrupted");
                                break;
                            }
                        }
                    }
                    let produced = records.len() - before;
                    tracing::debug!(target = %target, records = produced, "Target resolved");
                    self.emit(Event::TargetResolved {
                        target: target.as_str().to_string(),
                        records: produced,
                    });
                }
                Err(e) => {
                    tracing::error!(target = %target, error = %e, "Target resolution failed");
                    self.emit(Event::TargetFailed {
                        target: target.as_str().to_string(),
                        error: e.to_string(),
                    });
                    last_error = Some(e.to_string());
                }
            }
        }

        if resolved == 0 && !self.cancel.is_cancelled() {
            return Err(Error::TargetResolution(
                last_error.unwrap_or_else(|| "no target could be resolved".to_string()),
            ));
        }
        Ok(records)
    }

    /// Interleave dedup skips with download outcomes back into admission order
    fn merge_outcomes(
        &self,
        admitted: &[VideoRecord],
        is_duplicate: &[bool],
        downloaded: Vec<DownloadOutcome>,
    ) -> Vec<DownloadOutcome> {
        let mut downloaded = downloaded.into_iter();
        let mut outcomes = Vec::with_capacity(admitted.len());
        for (record, duplicate) in admitted.iter().zip(is_duplicate) {
            if *duplicate {
                tracing::debug!(id = %record.id, "Duplicate identifier skipped");
                self.emit(Event::Skipped {
                    id: record.id.clone(),
                    reason: SkipReason::Duplicate,
                });
                outcomes.push(DownloadOutcome::skipped(
                    record.id.clone(),
                    SkipReason::Duplicate,
                ));
            } else if let Some(outcome) = downloaded.next() {
                outcomes.push(outcome);
            } else {
                tracing::error!(
                    id = %record.id,
                    "Download coordinator returned fewer outcomes than jobs"
                );
                break;
            }
        }
        outcomes
    }

    fn set_state(&self, next: RunState) {
        let previous = *self.state_tx.borrow();
        if previous != next {
            tracing::debug!(?previous, ?next, "Pipeline state transition");
            self.state_tx.send_replace(next);
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}
