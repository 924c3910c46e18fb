//! The previously published site, used as a cache.
//!
//! At start-up the build fetches `index.json` and `last_run.json` from the
//! publish site. Anything unreachable or malformed degrades to an empty
//! value. Recipes that are not due are then restored by downloading the
//! files listed for them, streamed straight to the publish directory.

use crate::models::{PublishIndex, RunLog};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use url::Url;

pub const INDEX_FILE: &str = "index.json";
pub const RUN_LOG_FILE: &str = "last_run.json";

const FILE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache url for {0}: {1}")]
    Url(String, url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected cache filename {0}")]
    BadName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Network hiccups and server errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CacheError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// HTTP client for the publish site.
#[derive(Debug, Clone)]
pub struct CacheClient {
    client: reqwest::Client,
    site: Url,
}

impl CacheClient {
    /// `site` must end with `/` (see [`crate::config::normalize_site`]).
    pub fn new(site: Url) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("recipe_press/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, site })
    }

    fn url_for(&self, file_name: &str) -> Result<Url, CacheError> {
        self.site
            .join(file_name)
            .map_err(|e| CacheError::Url(file_name.to_string(), e))
    }

    async fn get_text(&self, file_name: &str) -> Result<String, CacheError> {
        let url = self.url_for(file_name)?;
        let response = self.client.get(url.clone()).timeout(FILE_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Fetch the previous `index.json`, or an empty index.
    #[instrument(level = "info", skip_all, fields(site = %self.site))]
    pub async fn fetch_index(&self) -> PublishIndex {
        let text = match self.get_text(INDEX_FILE).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Cache index unavailable; starting with an empty cache");
                return PublishIndex::default();
            }
        };
        match PublishIndex::parse(&text) {
            Ok(index) => {
                info!(publications = index.entries.len(), "Loaded cache index");
                index
            }
            Err(e) => {
                warn!(error = %e, "Malformed cache index; starting with an empty cache");
                PublishIndex::default()
            }
        }
    }

    /// Fetch the previous `last_run.json`, or an empty log.
    #[instrument(level = "info", skip_all, fields(site = %self.site))]
    pub async fn fetch_run_log(&self) -> RunLog {
        match self.get_text(RUN_LOG_FILE).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(error = %e, "Malformed run log; treating every recipe as never run");
                RunLog::default()
            }),
            Err(e) => {
                warn!(error = %e, "Run log unavailable; treating every recipe as never run");
                RunLog::default()
            }
        }
    }

    /// Download one cached file into `dest_dir`, returning its path.
    ///
    /// The body is written to a `.part` file first so an interrupted transfer
    /// never looks like a finished artifact.
    #[instrument(level = "info", skip(self, dest_dir))]
    pub async fn download(&self, file_name: &str, dest_dir: &Path) -> Result<PathBuf, CacheError> {
        if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
            return Err(CacheError::BadName(file_name.to_string()));
        }
        let url = self.url_for(file_name)?;
        let response = self.client.get(url.clone()).timeout(FILE_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let dest = dest_dir.join(file_name);
        let partial = dest_dir.join(format!("{file_name}.part"));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            };
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &dest).await?;
        info!(bytes, dest = %dest.display(), "Downloaded cached file");
        Ok(dest)
    }

    /// Download every file in `file_names`; stops at the first failure.
    pub async fn download_all(&self, file_names: &[String], dest_dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
        let mut paths = Vec::with_capacity(file_names.len());
        for name in file_names {
            paths.push(self.download(name, dest_dir).await?);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_site;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> CacheClient {
        CacheClient::new(normalize_site(&format!("{}/news", server.uri())).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"bar": ["bar-2024-01-01.epub"], "_generated": 1704067200}"#,
            ))
            .mount(&server)
            .await;

        let index = client_for(&server).await.fetch_index().await;
        assert_eq!(index.files_for("bar").unwrap(), &["bar-2024-01-01.epub"]);
        assert_eq!(index.generated, 1704067200);
    }

    #[tokio::test]
    async fn test_fetch_index_degrades_on_error_and_garbage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;
        let client = client_for(&server).await;
        assert_eq!(client.fetch_index().await, PublishIndex::default());
        // Nothing mounted for last_run.json: wiremock answers 404.
        assert_eq!(client.fetch_run_log().await, RunLog::default());
    }

    #[tokio::test]
    async fn test_download_streams_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news/bar-2024-01-01.epub"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = client_for(&server)
            .await
            .download("bar-2024-01-01.epub", tmp.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert!(!tmp.path().join("bar-2024-01-01.epub.part").exists());
    }

    #[tokio::test]
    async fn test_download_rejects_missing_and_unsafe() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let client = client_for(&server).await;
        assert!(matches!(
            client.download("gone.epub", tmp.path()).await,
            Err(CacheError::Status { status: 404, .. })
        ));
        assert!(matches!(
            client.download("../etc/passwd", tmp.path()).await,
            Err(CacheError::BadName(_))
        ));
    }
}
