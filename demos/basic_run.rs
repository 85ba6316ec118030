//! Basic acquisition run example
//!
//! This example demonstrates the core functionality of tiktok-dl:
//! - Building resolved settings
//! - Creating a pipeline with the yt-dlp fetcher
//! - Subscribing to events
//! - Running the pipeline over a couple of targets
//! - Reading the run report

use std::sync::Arc;

use tiktok_dl::{Event, Pipeline, Settings, SourceTarget, YtDlpFetcher, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    // Build resolved settings (a real application would merge its own
    // config file / CLI options first)
    let settings = Settings {
        output_path: "downloads".into(),
        min_likes: Some(1000),
        min_views: Some(10_000),
        transcripts: true,
        concurrency: 4,
        ..Default::default()
    }
    .with_archive_in_output();

    // Create the pipeline with the yt-dlp backed fetcher
    let fetcher = Arc::new(YtDlpFetcher::new()?);
    let pipeline = Pipeline::new(settings, fetcher)?;

    // Subscribe to events
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::TargetResolved { target, records } => {
                    println!("✓ Resolved {target}: {records} record(s)");
                }
                Event::Admitted { id, title } => {
                    println!("→ Admitted {id}: {}", title.unwrap_or_default());
                }
                Event::Saved { id, media_path } => {
                    println!("✓ Saved {id} to {}", media_path.display());
                }
                Event::Skipped { id, reason } => {
                    println!("- Skipped {id} ({reason})");
                }
                Event::Failed { id, error } => {
                    println!("✗ Failed {id}: {error}");
                }
                Event::RunComplete {
                    saved,
                    skipped,
                    failed,
                } => {
                    println!("Done: {saved} saved, {skipped} skipped, {failed} failed");
                }
                _ => {}
            }
        }
    });

    let targets = vec![
        SourceTarget::parse("https://www.tiktok.com/@someuser")?,
        SourceTarget::parse("https://www.tiktok.com/tag/rustlang")?,
    ];

    // Ctrl+C cancels cleanly: in-flight downloads finish, the rest report
    // as skipped, and the report is still produced
    let report = run_with_shutdown(&pipeline, targets).await?;

    println!(
        "Fetched {}, admitted {}, saved {} in {:.1}s",
        report.total_fetched,
        report.total_admitted,
        report.saved(),
        report.elapsed.as_secs_f64()
    );

    // Convention for wrapping CLIs: exit nonzero when anything failed
    std::process::exit(if report.failed() == 0 { 0 } else { 1 });
}
