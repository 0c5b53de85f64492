//! Bulk model downloads from a Hugging Face style hub.
//!
//! Resolves a repository, picks the files to fetch (one quantization for
//! GGUF repos, everything otherwise) and downloads them concurrently into
//! `<dest_dir>/<owner>/<name>/`.

mod hub;
mod select;

pub use hub::{DEFAULT_HUB_URL, HubClient, TOKEN_ENV};
pub use select::{DEFAULT_GGUF_PREFERENCE, RepoId, is_quantized, parse_repo_id, select_files};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid model repository: {0} (expected owner/name or a hub link)")]
    InvalidRepo(String),

    #[error("No valid GGUF file found")]
    NoGguf,

    #[error("Refusing to write outside the destination: {0}")]
    UnsafePath(String),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and what to download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Root directory; files land under `<dest_dir>/<owner>/<name>/`.
    pub dest_dir: PathBuf,
    /// Quantizations tried in order for GGUF repos.
    pub gguf_preference: Vec<String>,
}

impl DownloadOptions {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            gguf_preference: DEFAULT_GGUF_PREFERENCE.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn repo_dir(&self, repo: &RepoId) -> PathBuf {
        self.dest_dir.join(&repo.owner).join(&repo.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub file: String,
    pub error: String,
}

/// Outcome of a bulk download. One failure never cancels the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub dir: PathBuf,
    pub downloaded: Vec<DownloadedFile>,
    pub failed: Vec<FailedFile>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.downloaded.iter().map(|f| f.bytes).sum()
    }
}

/// Fetch every file concurrently, one task per file.
pub async fn download_all(
    hub: &HubClient,
    repo: &RepoId,
    files: Vec<String>,
    dir: &Path,
) -> DownloadReport {
    let mut tasks = JoinSet::new();
    for file in files {
        let hub = hub.clone();
        let repo = repo.clone();
        let dir = dir.to_path_buf();
        tasks.spawn(async move {
            let result = hub.fetch_file(&repo, &file, &dir).await;
            (file, result)
        });
    }

    let mut report = DownloadReport {
        dir: dir.to_path_buf(),
        ..DownloadReport::default()
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((file, Ok(bytes))) => report.downloaded.push(DownloadedFile {
                path: dir.join(&file),
                file,
                bytes,
            }),
            Ok((file, Err(e))) => {
                tracing::warn!(file, error = %e, "Download failed");
                report.failed.push(FailedFile {
                    file,
                    error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Download task aborted");
                report.failed.push(FailedFile {
                    file: String::new(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.downloaded.sort_by(|a, b| a.file.cmp(&b.file));
    report.failed.sort_by(|a, b| a.file.cmp(&b.file));
    report
}

/// Resolve `model_or_url`, select its files and download them.
pub async fn download(
    hub: &HubClient,
    model_or_url: &str,
    options: &DownloadOptions,
) -> Result<DownloadReport, DownloadError> {
    let repo = parse_repo_id(model_or_url)?;
    tracing::info!(%repo, "Fetching file list");
    let files = hub.list_files(&repo).await?;

    let files = if repo.is_quantized() {
        select_files(&files, &options.gguf_preference)?
    } else {
        files
    };

    let dir = options.repo_dir(&repo);
    tokio::fs::create_dir_all(&dir).await?;
    tracing::info!(%repo, count = files.len(), dir = %dir.display(), "Starting download");

    Ok(download_all(hub, &repo, files, &dir).await)
}
