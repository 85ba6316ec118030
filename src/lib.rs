//! # tiktok-dl
//!
//! Backend library for filtered short-form video acquisition.
//!
//! ## Design Philosophy
//!
//! tiktok-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Boundary-clean** - The remote platform sits behind one `Fetcher` seam;
//!   settings arrive resolved; presentation stays with the caller
//! - **Partial-failure tolerant** - Per-record failures never abort a run;
//!   every admitted record ends in exactly one reported outcome
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiktok_dl::{Pipeline, Settings, SourceTarget, YtDlpFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings {
//!         output_path: "downloads".into(),
//!         min_likes: Some(1000),
//!         concurrency: 4,
//!         ..Default::default()
//!     }
//!     .with_archive_in_output();
//!
//!     let fetcher = Arc::new(YtDlpFetcher::new()?);
//!     let pipeline = Pipeline::new(settings, fetcher)?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let targets = vec![SourceTarget::parse("https://www.tiktok.com/@someuser")?];
//!     let report = pipeline.run(targets).await?;
//!     println!("Saved {} of {} admitted", report.saved(), report.total_admitted);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Resolved settings and retry configuration
pub mod config;
/// Bounded-concurrency download execution
pub mod coordinator;
/// Error types
pub mod error;
/// Metadata export
pub mod export;
/// Fetcher Adapter: the seam to the remote platform
pub mod fetcher;
/// Pure admission filtering
pub mod filter;
/// Dedup ledger (in-run set + persisted archive)
pub mod ledger;
/// Pipeline orchestrator
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types: targets, records, outcomes, reports, events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{RetryConfig, Settings};
pub use coordinator::DownloadCoordinator;
pub use error::{Error, FetchError, FetchErrorKind, Result};
pub use fetcher::{Fetcher, MaterializeOptions, Materialized, YtDlpFetcher};
pub use filter::{FilterPolicy, admits};
pub use ledger::DedupLedger;
pub use pipeline::{Pipeline, RunState};
pub use types::{
    DownloadOutcome, Event, OutcomeStatus, RunReport, SkipReason, SourceTarget, TargetKind,
    VideoId, VideoRecord, targets_from_lines,
};

/// Run a pipeline with graceful signal handling.
///
/// Spawns a task that waits for a termination signal and cancels the
/// pipeline's run; the run then drains cleanly (in-flight downloads finish,
/// the rest report as skipped) and the report is still returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tiktok_dl::{Pipeline, Settings, SourceTarget, YtDlpFetcher, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::new(Settings::default(), Arc::new(YtDlpFetcher::new()?))?;
///     let targets = vec![SourceTarget::parse("https://www.tiktok.com/@someuser")?];
///     let report = run_with_shutdown(&pipeline, targets).await?;
///     println!("{} saved", report.saved());
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    pipeline: &Pipeline,
    targets: Vec<SourceTarget>,
) -> Result<types::RunReport> {
    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });
    pipeline.run(targets).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
