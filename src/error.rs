use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] anyhow::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::Error),

    #[error("Download error: {0}")]
    Download(#[from] crate::download::DownloadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Empty prompt")]
    EmptyPrompt,
}

impl Error {
    /// Readable message, with JSON API error bodies unpacked.
    pub fn display_message(&self) -> String {
        match self {
            Error::Provider(crate::provider::Error::Api(msg)) => {
                crate::provider::format_api_error(msg)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_message_unpacks_api_errors() {
        let err = Error::from(crate::provider::Error::Api(
            r#"HTTP 401: {"error":{"message":"Invalid key"}}"#.to_string(),
        ));
        assert_eq!(err.display_message(), "HTTP 401: Invalid key");

        let err = Error::from(anyhow::anyhow!("bad config"));
        assert_eq!(err.display_message(), "bad config");
    }
}
