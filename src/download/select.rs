//! Repository ids and file selection.

use super::DownloadError;
use std::fmt;
use url::Url;

/// Quantizations tried in order when picking GGUF files.
pub const DEFAULT_GGUF_PREFERENCE: &[&str] = &["Q4_K_M", "Q4_K_S"];

const HUB_HOSTS: &[&str] = &["huggingface.co", "www.huggingface.co"];

/// A hub repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    /// Whether the repo holds quantized GGUF weights.
    pub fn is_quantized(&self) -> bool {
        is_quantized(&self.to_string())
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse `owner/name` or a hub link such as
/// `https://huggingface.co/owner/name/tree/main`.
pub fn parse_repo_id(input: &str) -> Result<RepoId, DownloadError> {
    let input = input.trim();
    let invalid = || DownloadError::InvalidRepo(input.to_string());

    if input.starts_with("https://") || input.starts_with("http://") {
        let url = Url::parse(input).map_err(|_| invalid())?;
        if !url.host_str().is_some_and(|host| HUB_HOSTS.contains(&host)) {
            return Err(invalid());
        }
        let mut segments = url.path_segments().ok_or_else(invalid)?;
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        return repo_from_parts(owner, name).ok_or_else(invalid);
    }

    match input.split('/').collect::<Vec<_>>().as_slice() {
        [owner, name] => repo_from_parts(owner, name).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn repo_from_parts(owner: &str, name: &str) -> Option<RepoId> {
    let valid = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    (valid(owner) && valid(name)).then(|| RepoId {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

/// A repo id containing `gguf` (any case) is treated as quantized.
pub fn is_quantized(repo: &str) -> bool {
    repo.to_lowercase().contains("gguf")
}

/// Pick the files to fetch from a quantized repo.
///
/// The first preference that is a substring of any file selects every file
/// matching it. Failing that, the first `.gguf` file is used.
pub fn select_files<S: AsRef<str>>(
    files: &[String],
    preference: &[S],
) -> Result<Vec<String>, DownloadError> {
    for quant in preference {
        let quant = quant.as_ref();
        let matching: Vec<String> = files.iter().filter(|f| f.contains(quant)).cloned().collect();
        if !matching.is_empty() {
            tracing::debug!(quant, count = matching.len(), "Selected preferred quantization");
            return Ok(matching);
        }
    }

    files
        .iter()
        .find(|f| f.ends_with(".gguf"))
        .map(|f| vec![f.clone()])
        .ok_or(DownloadError::NoGguf)
}
