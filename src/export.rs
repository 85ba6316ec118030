//! Metadata export
//!
//! Writes the admitted records' metadata to disk as pretty-printed JSON so a
//! run's catch can be inspected or post-processed without re-fetching.

use std::path::Path;

use crate::error::Result;
use crate::types::VideoRecord;

/// Write records' metadata as a JSON array
///
/// Nothing is written for an empty record set. Parent directories are created
/// as needed.
pub async fn write_metadata_json(records: &[VideoRecord], path: &Path) -> Result<()> {
    if records.is_empty() {
        tracing::info!("No records to export");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(records)?;
    tokio::fs::write(path, json).await?;
    tracing::info!(
        path = %path.display(),
        records = records.len(),
        "Exported metadata"
    );
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::record;

    #[tokio::test]
    async fn export_round_trips_records() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/metadata.json");
        let records = vec![
            record("x1", 10u64, 20u64),
            record("x2", None::<u64>, None::<u64>),
        ];

        write_metadata_json(&records, &path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<VideoRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, records);
    }

    #[tokio::test]
    async fn empty_record_set_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("metadata.json");

        write_metadata_json(&[], &path).await.unwrap();

        assert!(!path.exists());
    }
}
