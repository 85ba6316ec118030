//! Production Fetcher backed by the `yt-dlp` binary and direct HTTP transfer
//!
//! Metadata extraction shells out to `yt-dlp --dump-json`, parsing one JSON
//! record per stdout line as the extractor paginates through a feed — the
//! record stream stays lazy end to end. Byte transfer does not go through
//! yt-dlp: media and transcript URLs from the metadata are fetched directly
//! over HTTP with per-attempt timeouts, which keeps retry and timeout policy
//! in the pipeline's hands.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;

use super::{Fetcher, MaterializeOptions, Materialized, RecordStream};
use crate::error::{FetchError, Result};
use crate::types::{SourceTarget, TargetKind, VideoId, VideoRecord};

/// Browser-like user agent; some CDNs refuse the default client string
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Cap on the sanitized title portion of output filenames
const MAX_STEM_LEN: usize = 150;

/// Fetcher implementation driving the `yt-dlp` binary
pub struct YtDlpFetcher {
    binary: PathBuf,
    client: reqwest::Client,
}

impl YtDlpFetcher {
    /// Create a fetcher using an explicitly configured binary path
    pub fn with_binary(binary: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { binary, client }
    }

    /// Create a fetcher by searching PATH for the `yt-dlp` binary
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::with_binary)
    }

    /// Create a fetcher, failing if no binary can be found
    pub fn new() -> Result<Self> {
        Self::from_path().ok_or_else(|| crate::error::Error::Config {
            message: "yt-dlp binary not found in PATH".to_string(),
            key: Some("fetcher.binary".to_string()),
        })
    }

    /// Classify a target by its URL shape
    ///
    /// `/…/video/<id>` is a single video, a leading `@handle` segment is a
    /// user feed, `tag`/`hashtag` segments are hashtag feeds. Anything else
    /// is treated as a single video and left for the extractor to sort out.
    fn classify(target: &SourceTarget) -> TargetKind {
        let Ok(url) = url::Url::parse(target.as_str()) else {
            return TargetKind::Video;
        };
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if segments.iter().any(|s| *s == "video") {
            return TargetKind::Video;
        }
        if segments
            .iter()
            .any(|s| *s == "tag" || *s == "hashtag")
        {
            return TargetKind::Hashtag;
        }
        if segments.first().is_some_and(|s| s.starts_with('@')) {
            return TargetKind::User;
        }
        TargetKind::Video
    }

    /// Parse one `--dump-json` output line into a record
    ///
    /// Malformed entries (no id, no page URL) are skipped with a warning
    /// rather than failing the feed.
    fn parse_record(line: &str) -> Option<VideoRecord> {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable metadata line");
                return None;
            }
        };

        let Some(id) = value["id"].as_str() else {
            tracing::warn!("Skipping metadata entry without an id");
            return None;
        };
        let Some(webpage_url) = value["webpage_url"].as_str().or(value["original_url"].as_str())
        else {
            tracing::warn!(id, "Skipping metadata entry without a page URL");
            return None;
        };

        let upload_date = value["upload_date"]
            .as_str()
            .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y%m%d").ok());

        Some(VideoRecord {
            id: VideoId::new(id),
            title: value["title"].as_str().map(str::to_string),
            author: value["uploader"]
                .as_str()
                .or(value["channel"].as_str())
                .or(value["uploader_id"].as_str())
                .map(str::to_string),
            like_count: value["like_count"].as_u64(),
            view_count: value["view_count"].as_u64(),
            webpage_url: webpage_url.to_string(),
            media_url: value["url"].as_str().map(str::to_string),
            transcript_url: Self::pick_transcript_url(&value),
            upload_date,
        })
    }

    /// Pick a transcript URL from the subtitle tables, preferring English
    ///
    /// Checks authored subtitles before automatic captions; within a table,
    /// `en`-prefixed languages win and the remaining keys are scanned in
    /// sorted order for determinism.
    fn pick_transcript_url(value: &serde_json::Value) -> Option<String> {
        for table in ["subtitles", "automatic_captions"] {
            let Some(langs) = value[table].as_object() else {
                continue;
            };
            let mut keys: Vec<&String> = langs.keys().collect();
            keys.sort_by(|a, b| {
                (!a.starts_with("en"), a.as_str()).cmp(&(!b.starts_with("en"), b.as_str()))
            });
            for lang in keys {
                if let Some(url) = langs[lang.as_str()]
                    .as_array()
                    .and_then(|entries| entries.first())
                    .and_then(|entry| entry["url"].as_str())
                {
                    return Some(url.to_string());
                }
            }
        }
        None
    }

    /// Translate a yt-dlp nonzero exit into the fetch taxonomy
    fn translate_ytdlp_failure(stderr: &str) -> FetchError {
        let detail = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("yt-dlp exited with an error")
            .to_string();
        let lowered = detail.to_lowercase();

        if lowered.contains("429") || lowered.contains("rate") {
            FetchError::rate_limited(detail)
        } else if lowered.contains("404")
            || lowered.contains("not found")
            || lowered.contains("does not exist")
            || lowered.contains("unable to extract")
        {
            FetchError::not_found(detail)
        } else if lowered.contains("timed out")
            || lowered.contains("timeout")
            || lowered.contains("connection")
            || lowered.contains("network")
            || lowered.contains("unable to download")
        {
            FetchError::network(detail)
        } else {
            FetchError::unsupported(detail)
        }
    }

    /// Translate a reqwest transport error
    fn translate_reqwest(context: &str, e: reqwest::Error) -> FetchError {
        if e.is_builder() || e.is_redirect() {
            FetchError::unsupported(format!("{context}: {e}"))
        } else {
            // Timeouts, connect failures and interrupted bodies are all
            // transient from the pipeline's point of view.
            FetchError::network(format!("{context}: {e}"))
        }
    }

    /// Translate a non-success HTTP status
    fn translate_status(url: &str, status: reqwest::StatusCode) -> FetchError {
        match status.as_u16() {
            404 | 410 => FetchError::not_found(format!("HTTP {status} for {url}")),
            429 => FetchError::rate_limited(format!("HTTP {status} for {url}")),
            408 | 500..=599 => FetchError::network(format!("HTTP {status} for {url}")),
            _ => FetchError::unsupported(format!("HTTP {status} for {url}")),
        }
    }

    /// Stream a URL's body to a file, writing through a `.part` temp name
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        timeout: std::time::Duration,
    ) -> std::result::Result<(), FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::unsupported(format!("invalid download URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::unsupported(format!(
                "unsupported download URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::translate_reqwest("requesting bytes", e))?;
        if !response.status().is_success() {
            return Err(Self::translate_status(url, response.status()));
        }

        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);

        let write_result = async {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| FetchError::from_io("creating output file", &e))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Self::translate_reqwest("reading body", e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| FetchError::from_io("writing output file", &e))?;
            }
            file.flush()
                .await
                .map_err(|e| FetchError::from_io("flushing output file", &e))
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| FetchError::from_io("renaming output file", &e))
    }
}

#[async_trait::async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, target: &SourceTarget) -> std::result::Result<RecordStream, FetchError> {
        let kind = Self::classify(target);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--dump-json").arg("--no-warnings");
        if kind == TargetKind::Video {
            cmd.arg("--no-playlist");
        }
        cmd.arg(target.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            FetchError::unsupported(format!(
                "failed to launch yt-dlp at {}: {e}",
                self.binary.display()
            ))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::unsupported("yt-dlp stdout unavailable"))?;
        let mut lines = BufReader::new(stdout).lines();

        // Pre-read until the first record so an unresolvable target surfaces
        // as an error here, while an empty-but-valid feed yields Ok(empty).
        let first = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(record) = Self::parse_record(&line) {
                        break record;
                    }
                }
                Ok(None) => {
                    let status = child
                        .wait()
                        .await
                        .map_err(|e| FetchError::from_io("waiting for yt-dlp", &e))?;
                    if status.success() {
                        tracing::debug!(target = %target, ?kind, "Target resolved to an empty feed");
                        return Ok(futures::stream::empty().boxed());
                    }
                    let mut stderr = String::new();
                    if let Some(mut pipe) = child.stderr.take() {
                        let _ = pipe.read_to_string(&mut stderr).await;
                    }
                    return Err(Self::translate_ytdlp_failure(&stderr));
                }
                Err(e) => return Err(FetchError::from_io("reading yt-dlp output", &e)),
            }
        };

        tracing::debug!(target = %target, ?kind, "Target resolved, streaming records");

        let rest = LinesStream::new(lines).filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Self::parse_record(&line).map(Ok),
                Err(e) => Some(Err(FetchError::from_io("reading yt-dlp output", &e))),
            }
        });

        // The child rides along in a tail stage so it stays alive while the
        // stream is consumed and gets reaped (or killed on drop) afterwards.
        let tail = futures::stream::once(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(code = status.code(), "yt-dlp exited nonzero mid-feed");
                }
                Err(e) => tracing::warn!(error = %e, "Failed to reap yt-dlp"),
                _ => {}
            }
            None
        })
        .filter_map(|item: Option<std::result::Result<VideoRecord, FetchError>>| async move { item });

        Ok(futures::stream::once(async move { Ok(first) })
            .chain(rest)
            .chain(tail)
            .boxed())
    }

    async fn materialize(
        &self,
        record: &VideoRecord,
        opts: &MaterializeOptions,
    ) -> std::result::Result<Materialized, FetchError> {
        let media_url = record
            .media_url
            .as_deref()
            .ok_or_else(|| FetchError::unsupported("record has no direct media URL"))?;

        tokio::fs::create_dir_all(&opts.output_dir)
            .await
            .map_err(|e| FetchError::from_io("creating output directory", &e))?;

        let stem = output_stem(record);
        let media_path = opts
            .output_dir
            .join(format!("{stem}.{}", extension_for(media_url, "mp4")));

        self.download_to(media_url, &media_path, opts.timeout).await?;
        tracing::debug!(id = %record.id, path = %media_path.display(), "Media saved");

        let (transcript_path, transcript_error) = match (&record.transcript_url, opts.transcripts) {
            (Some(url), true) => {
                let path = opts
                    .output_dir
                    .join(format!("{stem}.{}", extension_for(url, "vtt")));
                match self.download_to(url, &path, opts.timeout).await {
                    Ok(()) => (Some(path), None),
                    Err(e) => {
                        tracing::warn!(id = %record.id, error = %e, "Transcript fetch failed");
                        (None, Some(e))
                    }
                }
            }
            _ => (None, None),
        };

        Ok(Materialized {
            media_path,
            transcript_path,
            transcript_error,
        })
    }
}

/// Build the output filename stem: `<sanitized title> [<id>]`
///
/// Mirrors the `%(title)s [%(id)s]` convention so previously downloaded files
/// are recognizable by identifier.
fn output_stem(record: &VideoRecord) -> String {
    let title = record.title.as_deref().unwrap_or("video");
    format!("{} [{}]", sanitize_file_stem(title), record.id)
}

/// Replace filesystem-hostile characters and cap the length
fn sanitize_file_stem(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    let mut stem: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    if stem.is_empty() {
        stem.push_str("video");
    }
    stem
}

/// Pick a file extension from a URL's path, falling back when absent
fn extension_for(url: &str, fallback: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| fallback.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> SourceTarget {
        SourceTarget::parse(url).unwrap()
    }

    #[test]
    fn classify_distinguishes_video_user_and_hashtag_urls() {
        assert_eq!(
            YtDlpFetcher::classify(&target("https://www.tiktok.com/@user/video/7123")),
            TargetKind::Video
        );
        assert_eq!(
            YtDlpFetcher::classify(&target("https://www.tiktok.com/@user")),
            TargetKind::User
        );
        assert_eq!(
            YtDlpFetcher::classify(&target("https://www.tiktok.com/tag/funny")),
            TargetKind::Hashtag
        );
        assert_eq!(
            YtDlpFetcher::classify(&target("https://www.tiktok.com/hashtag/dance")),
            TargetKind::Hashtag
        );
        // Unrecognized shapes default to a single video
        assert_eq!(
            YtDlpFetcher::classify(&target("https://example.com/share/xyz")),
            TargetKind::Video
        );
    }

    #[test]
    fn parse_record_extracts_core_fields() {
        let line = r#"{"id":"7123","title":"Funny cat","uploader":"catlady",
            "like_count":1500,"view_count":90000,
            "webpage_url":"https://www.tiktok.com/@catlady/video/7123",
            "url":"https://cdn.example.com/v/7123.mp4","upload_date":"20240615"}"#
            .replace('\n', " ");

        let record = YtDlpFetcher::parse_record(&line).unwrap();
        assert_eq!(record.id.as_str(), "7123");
        assert_eq!(record.title.as_deref(), Some("Funny cat"));
        assert_eq!(record.author.as_deref(), Some("catlady"));
        assert_eq!(record.like_count, Some(1500));
        assert_eq!(record.view_count, Some(90000));
        assert_eq!(
            record.media_url.as_deref(),
            Some("https://cdn.example.com/v/7123.mp4")
        );
        assert_eq!(
            record.upload_date,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 15)
        );
    }

    #[test]
    fn parse_record_skips_entries_without_id_or_page_url() {
        assert!(YtDlpFetcher::parse_record(r#"{"title":"no id"}"#).is_none());
        assert!(YtDlpFetcher::parse_record(r#"{"id":"x"}"#).is_none());
        assert!(YtDlpFetcher::parse_record("not json").is_none());
    }

    #[test]
    fn parse_record_tolerates_missing_counts() {
        let line = r#"{"id":"1","webpage_url":"https://t/1"}"#;
        let record = YtDlpFetcher::parse_record(line).unwrap();
        assert_eq!(record.like_count, None);
        assert_eq!(record.view_count, None);
        assert_eq!(record.media_url, None);
        assert_eq!(record.upload_date, None);
    }

    #[test]
    fn transcript_prefers_authored_english_subtitles() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{
                "subtitles": {
                    "de": [{"url": "https://sub/de.vtt"}],
                    "en-US": [{"url": "https://sub/en.vtt"}]
                },
                "automatic_captions": {
                    "en": [{"url": "https://auto/en.vtt"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(
            YtDlpFetcher::pick_transcript_url(&value).as_deref(),
            Some("https://sub/en.vtt")
        );
    }

    #[test]
    fn transcript_falls_back_to_automatic_captions() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{"automatic_captions": {"fr": [{"url": "https://auto/fr.vtt"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            YtDlpFetcher::pick_transcript_url(&value).as_deref(),
            Some("https://auto/fr.vtt")
        );
        assert_eq!(
            YtDlpFetcher::pick_transcript_url(&serde_json::json!({})),
            None
        );
    }

    #[test]
    fn ytdlp_failure_translation_matches_taxonomy() {
        let not_found =
            YtDlpFetcher::translate_ytdlp_failure("ERROR: Unable to extract video data");
        assert_eq!(not_found.kind, crate::error::FetchErrorKind::NotFound);

        let rate = YtDlpFetcher::translate_ytdlp_failure("ERROR: HTTP Error 429: Too Many Requests");
        assert_eq!(rate.kind, crate::error::FetchErrorKind::RateLimited);
        assert!(rate.retryable);

        let net = YtDlpFetcher::translate_ytdlp_failure("ERROR: connection reset by peer");
        assert_eq!(net.kind, crate::error::FetchErrorKind::NetworkError);
        assert!(net.retryable);

        let other = YtDlpFetcher::translate_ytdlp_failure("ERROR: something exotic");
        assert_eq!(other.kind, crate::error::FetchErrorKind::Unsupported);
        assert!(!other.retryable);
    }

    #[test]
    fn status_translation_matches_taxonomy() {
        use reqwest::StatusCode;
        let nf = YtDlpFetcher::translate_status("u", StatusCode::NOT_FOUND);
        assert_eq!(nf.kind, crate::error::FetchErrorKind::NotFound);
        assert!(!nf.retryable);

        let rl = YtDlpFetcher::translate_status("u", StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rl.kind, crate::error::FetchErrorKind::RateLimited);
        assert!(rl.retryable);

        let server = YtDlpFetcher::translate_status("u", StatusCode::BAD_GATEWAY);
        assert_eq!(server.kind, crate::error::FetchErrorKind::NetworkError);
        assert!(server.retryable);

        let forbidden = YtDlpFetcher::translate_status("u", StatusCode::FORBIDDEN);
        assert_eq!(forbidden.kind, crate::error::FetchErrorKind::Unsupported);
    }

    #[test]
    fn output_stem_sanitizes_and_tags_the_id() {
        let record = VideoRecord {
            id: VideoId::new("7123"),
            title: Some("cats/dogs: a \"study\"?".to_string()),
            author: None,
            like_count: None,
            view_count: None,
            webpage_url: "https://t/7123".to_string(),
            media_url: None,
            transcript_url: None,
            upload_date: None,
        };
        assert_eq!(output_stem(&record), "cats_dogs_ a _study__ [7123]");
    }

    #[test]
    fn output_stem_falls_back_when_title_is_missing_or_empty() {
        let mut record = VideoRecord {
            id: VideoId::new("9"),
            title: None,
            author: None,
            like_count: None,
            view_count: None,
            webpage_url: "https://t/9".to_string(),
            media_url: None,
            transcript_url: None,
            upload_date: None,
        };
        assert_eq!(output_stem(&record), "video [9]");

        record.title = Some("...".to_string());
        assert_eq!(output_stem(&record), "video [9]");
    }

    #[test]
    fn extension_is_taken_from_the_url_path_with_fallback() {
        assert_eq!(extension_for("https://cdn.x/v/1.webm?sig=abc", "mp4"), "webm");
        assert_eq!(extension_for("https://cdn.x/v/1", "mp4"), "mp4");
        assert_eq!(extension_for("https://cdn.x/sub.vtt", "vtt"), "vtt");
        // Suspiciously long "extensions" are treated as no extension
        assert_eq!(extension_for("https://cdn.x/v/file.somethinglong", "mp4"), "mp4");
    }
}
