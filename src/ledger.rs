//! Dedup ledger: prevents duplicate processing of the same video identifier
//!
//! Within a run the ledger is a mutex-protected set; [`DedupLedger::mark`] is
//! a single atomic check-and-insert, called the instant a record is admitted
//! for download and before any transfer begins, so overlapping feeds in the
//! same run can never double-download an identifier.
//!
//! Across runs the ledger can persist to an archive file in yt-dlp's
//! download-archive line format (`tiktok <id>`), loaded once at run start and
//! flushed once at run end. The acceptable loss window is one run; nothing is
//! persisted mid-run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::VideoId;

/// Extractor tag written to archive lines, matching yt-dlp's format so the
/// file stays interchangeable with a yt-dlp `--download-archive`
const ARCHIVE_EXTRACTOR: &str = "tiktok";

/// Matches the `[<id>].<ext>` suffix our output filenames carry
#[allow(clippy::expect_used)]
static OUTPUT_ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\[([0-9A-Za-z_-]+)\]\.[0-9A-Za-z]+$").expect("static regex must compile")
});

/// Tracks which video identifiers have been processed
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: Mutex<HashSet<VideoId>>,
}

impl DedupLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark an identifier as processed
    ///
    /// Returns `true` if the identifier was newly marked (this caller wins and
    /// may download it), `false` if it was already known.
    pub async fn mark(&self, id: &VideoId) -> bool {
        self.seen.lock().await.insert(id.clone())
    }

    /// Whether an identifier has been marked
    pub async fn seen(&self, id: &VideoId) -> bool {
        self.seen.lock().await.contains(id)
    }

    /// Remove an identifier, making it eligible again
    ///
    /// Used by the orchestrator for records whose download failed or was
    /// cancelled, so a later run (with a persisted archive) retries them.
    pub async fn forget(&self, id: &VideoId) {
        self.seen.lock().await.remove(id);
    }

    /// Number of marked identifiers
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Whether the ledger is empty
    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }

    /// Load identifiers from an archive file
    ///
    /// A missing file is not an error (first run); returns the number of
    /// identifiers loaded. Lines are `<extractor> <id>` (the id is the last
    /// whitespace-separated token, so bare-id files load too).
    pub async fn load_archive(&self, path: &Path) -> Result<usize> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut seen = self.seen.lock().await;
        let mut loaded = 0;
        for line in content.lines() {
            if let Some(id) = line.split_whitespace().next_back()
                && seen.insert(VideoId::new(id))
            {
                loaded += 1;
            }
        }
        tracing::debug!(path = %path.display(), loaded, "Loaded dedup archive");
        Ok(loaded)
    }

    /// Write all marked identifiers to an archive file
    ///
    /// Identifiers are sorted for stable output. Parent directories are
    /// created as needed.
    pub async fn flush_archive(&self, path: &Path) -> Result<()> {
        let mut ids: Vec<VideoId> = {
            let seen = self.seen.lock().await;
            seen.iter().cloned().collect()
        };
        ids.sort();

        let mut content = String::new();
        for id in &ids {
            content.push_str(ARCHIVE_EXTRACTOR);
            content.push(' ');
            content.push_str(id.as_str());
            content.push('\n');
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        tracing::debug!(path = %path.display(), entries = ids.len(), "Flushed dedup archive");
        Ok(())
    }

    /// Seed the ledger from prior output filenames in a directory
    ///
    /// Output files are named `<title> [<id>].<ext>`; any file matching that
    /// shape marks its identifier as already downloaded. Returns the number of
    /// identifiers added. A missing directory is not an error.
    pub async fn prime_from_dir(&self, dir: &Path) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut seen = self.seen.lock().await;
        let mut primed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = OUTPUT_ID_RE.captures(name)
                && let Some(id) = caps.get(1)
                && seen.insert(VideoId::new(id.as_str()))
            {
                primed += 1;
            }
        }
        if primed > 0 {
            tracing::debug!(dir = %dir.display(), primed, "Primed ledger from existing output");
        }
        Ok(primed)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_is_first_caller_wins() {
        let ledger = DedupLedger::new();
        let id = VideoId::new("7001");
        assert!(ledger.mark(&id).await, "first mark succeeds");
        assert!(!ledger.mark(&id).await, "second mark is rejected");
        assert!(ledger.seen(&id).await);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn forget_makes_an_id_eligible_again() {
        let ledger = DedupLedger::new();
        let id = VideoId::new("7002");
        assert!(ledger.mark(&id).await);
        ledger.forget(&id).await;
        assert!(!ledger.seen(&id).await);
        assert!(ledger.mark(&id).await);
    }

    #[tokio::test]
    async fn archive_round_trips_in_ytdlp_format() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("archive.txt");

        let ledger = DedupLedger::new();
        ledger.mark(&VideoId::new("b2")).await;
        ledger.mark(&VideoId::new("a1")).await;
        ledger.flush_archive(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "tiktok a1\ntiktok b2\n", "sorted, one id per line");

        let reloaded = DedupLedger::new();
        assert_eq!(reloaded.load_archive(&path).await.unwrap(), 2);
        assert!(reloaded.seen(&VideoId::new("a1")).await);
        assert!(reloaded.seen(&VideoId::new("b2")).await);
    }

    #[tokio::test]
    async fn load_accepts_bare_id_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("archive.txt");
        std::fs::write(&path, "tiktok 111\n222\n\n").unwrap();

        let ledger = DedupLedger::new();
        assert_eq!(ledger.load_archive(&path).await.unwrap(), 2);
        assert!(ledger.seen(&VideoId::new("111")).await);
        assert!(ledger.seen(&VideoId::new("222")).await);
    }

    #[tokio::test]
    async fn missing_archive_loads_as_empty() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = DedupLedger::new();
        let loaded = ledger
            .load_archive(&temp.path().join("does-not-exist.txt"))
            .await
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn prime_from_dir_extracts_ids_from_output_filenames() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("funny cat [7123].mp4"), b"x").unwrap();
        std::fs::write(temp.path().join("dance [7456].webm"), b"x").unwrap();
        std::fs::write(temp.path().join("no-id-here.mp4"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();

        let ledger = DedupLedger::new();
        assert_eq!(ledger.prime_from_dir(temp.path()).await.unwrap(), 2);
        assert!(ledger.seen(&VideoId::new("7123")).await);
        assert!(ledger.seen(&VideoId::new("7456")).await);
        assert!(!ledger.seen(&VideoId::new("no-id-here")).await);
    }

    #[tokio::test]
    async fn prime_from_missing_dir_is_a_noop() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = DedupLedger::new();
        let primed = ledger
            .prime_from_dir(&temp.path().join("nope"))
            .await
            .unwrap();
        assert_eq!(primed, 0);
    }
}
