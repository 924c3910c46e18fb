//! JSON files in the publish directory.
//!
//! `index.json` is what the next build reads back as its cache, so it is
//! written even when every recipe failed. `last_run.json` keeps the interval
//! schedules honest across runs.

use crate::cache::{INDEX_FILE, RUN_LOG_FILE};
use crate::models::{PublishIndex, RunLog};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

async fn write_file(path: PathBuf, contents: String) -> Result<PathBuf, Box<dyn Error>> {
    if let Err(e) = fs::write(&path, contents).await {
        error!(path = %path.display(), error = %e, "Failed to write JSON");
        return Err(e.into());
    }
    info!(path = %path.display(), "Wrote JSON");
    Ok(path)
}

/// Write `index.json` into `publish_dir`.
#[instrument(level = "info", skip_all, fields(publish_dir = %publish_dir.display()))]
pub async fn write_index(index: &PublishIndex, publish_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = index.to_json_string()?;
    write_file(publish_dir.join(INDEX_FILE), json).await
}

/// Write `last_run.json` into `publish_dir`.
#[instrument(level = "info", skip_all, fields(publish_dir = %publish_dir.display()))]
pub async fn write_run_log(run_log: &RunLog, publish_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(run_log)?;
    write_file(publish_dir.join(RUN_LOG_FILE), json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_write_index_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = PublishIndex {
            generated: 1704182400,
            ..Default::default()
        };
        index
            .entries
            .insert("foo".into(), vec!["foo-2024-01-02.epub".into(), "foo-2024-01-02.mobi".into()]);

        let path = write_index(&index, tmp.path()).await.unwrap();
        assert_eq!(path, tmp.path().join("index.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(PublishIndex::parse(&text).unwrap(), index);
    }

    #[tokio::test]
    async fn test_write_run_log() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = RunLog::default();
        log.record("foo", Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap());
        write_run_log(&log, tmp.path()).await.unwrap();
        let text = std::fs::read_to_string(tmp.path().join("last_run.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"foo": 1704182400}));
    }

    #[tokio::test]
    async fn test_write_into_missing_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(write_index(&PublishIndex::default(), &missing).await.is_err());
    }
}
