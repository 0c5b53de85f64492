//! Model hub HTTP client.

use super::DownloadError;
use super::select::RepoId;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";
pub const TOKEN_ENV: &str = "HF_TOKEN";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// Lists and fetches repository files.
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Client for `base_url`, authenticated by `HF_TOKEN` when set.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        Self::new(base_url, std::env::var(TOKEN_ENV).ok())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| DownloadError::Hub(format!("Invalid token: {e}")))?;
            request = request.header(AUTHORIZATION, value);
        }
        Ok(request)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self.get(url)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownloadError::Hub(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    /// Every file path in the repository's main revision.
    pub async fn list_files(&self, repo: &RepoId) -> Result<Vec<String>, DownloadError> {
        let url = format!("{}/api/models/{repo}", self.base_url);
        tracing::debug!(%url, "Listing repository files");

        let info: ModelInfo = self.send(&url).await?.json().await?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Resolve URL for one file.
    pub fn file_url(&self, repo: &RepoId, file: &str) -> String {
        let encoded: Vec<_> = file.split('/').map(urlencoding::encode).collect();
        format!(
            "{}/{repo}/resolve/main/{}?download=true",
            self.base_url,
            encoded.join("/")
        )
    }

    /// Stream `file` into `dest_dir/<file>`, returning the bytes written.
    ///
    /// The body is written to a `.part` sibling and renamed once complete, so
    /// an interrupted download never leaves a file under the final name.
    pub async fn fetch_file(
        &self,
        repo: &RepoId,
        file: &str,
        dest_dir: &Path,
    ) -> Result<u64, DownloadError> {
        let dest = dest_dir.join(relative_path(file)?);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = self.file_url(repo, file);
        tracing::info!(file, dest = %dest.display(), "Downloading");
        let response = self.send(&url).await?;

        let written = store_body(response.bytes_stream(), &dest).await?;
        tracing::debug!(file, bytes = written, "Download complete");
        Ok(written)
    }
}

/// Write `body` to `<dest>.part`, then rename it to `dest`.
///
/// On any failure the partial file is removed.
async fn store_body<S, E>(body: S, dest: &Path) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    DownloadError: From<E>,
{
    let partial = partial_path(dest);
    let result = write_partial(body, &partial).await;
    let result = match result {
        Ok(written) => tokio::fs::rename(&partial, dest)
            .await
            .map(|()| written)
            .map_err(<DownloadError as From<std::io::Error>>::from),
        Err(e) => Err(e),
    };

    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
    }
    result
}

async fn write_partial<S, E>(body: S, partial: &Path) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    DownloadError: From<E>,
{
    let mut body = std::pin::pin!(body);
    let mut out = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// Reject absolute paths and parent components in hub-supplied names.
fn relative_path(file: &str) -> Result<PathBuf, DownloadError> {
    let path = Path::new(file);
    let safe = !file.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(DownloadError::UnsafePath(file.to_string()))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
