//! Provider error types.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Error bodies sent by the supported APIs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    /// OpenAI and OpenRouter `{"error": {...}}`, and Anthropic
    /// `{"type": "error", "error": {...}}`.
    Nested { error: ErrorDetail },
    /// `{"error": "..."}`
    Flat { error: String },
    /// `{"message": "..."}`
    Bare { message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<ErrorCode>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// OpenAI sends string codes, OpenRouter numeric ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorCode {
    Text(String),
    Number(i64),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(code) => f.write_str(code),
            Self::Number(code) => write!(f, "{code}"),
        }
    }
}

impl ErrorBody {
    fn summary(self) -> String {
        match self {
            Self::Nested { error } => match (error.code, error.kind) {
                (Some(code), _) => format!("{} (code: {code})", error.message),
                (None, Some(kind)) => format!("{} (type: {kind})", error.message),
                (None, None) => error.message,
            },
            Self::Flat { error } => error,
            Self::Bare { message } => message,
        }
    }
}

/// Shorten `HTTP <status>: <json body>` to the status plus the body's message.
///
/// Text that does not end in a recognized error body is returned unchanged.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    let Some(start) = error.find('{') else {
        return error.to_string();
    };
    let (status, body) = error.split_at(start);

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(body) => {
            let status = status.trim();
            let summary = body.summary();
            if status.is_empty() {
                summary
            } else {
                format!("{status} {summary}")
            }
        }
        Err(_) => error.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing API key for {backend}. Set one of: {}", env_vars.join(", "))]
    MissingApiKey {
        backend: String,
        env_vars: Vec<String>,
    },

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_body_with_string_code() {
        let error = r#"HTTP 429: {"error":{"message":"Rate limit exceeded","type":"rate_limit_error","code":"rate_limit_exceeded"}}"#;
        let formatted = format_api_error(error);
        assert_eq!(
            formatted,
            "HTTP 429: Rate limit exceeded (code: rate_limit_exceeded)"
        );
    }

    #[test]
    fn test_format_anthropic_error() {
        let error = r#"HTTP 401 Unauthorized: {"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let formatted = format_api_error(error);
        assert_eq!(
            formatted,
            "HTTP 401 Unauthorized: invalid x-api-key (type: authentication_error)"
        );
    }

    #[test]
    fn test_format_openrouter_numeric_code() {
        let error = r#"HTTP 402: {"error":{"message":"Insufficient credits","code":402}}"#;
        assert_eq!(
            format_api_error(error),
            "HTTP 402: Insufficient credits (code: 402)"
        );
    }

    #[test]
    fn test_unsupported_display() {
        let err = Error::Unsupported {
            provider: "Anthropic",
            operation: "text completion",
        };
        assert_eq!(err.to_string(), "Anthropic does not support text completion");
    }

    #[test]
    fn test_flat_error_string() {
        let error = r#"{"error":"Invalid API key"}"#;
        let formatted = format_api_error(error);
        assert_eq!(formatted, "Invalid API key");
    }

    #[test]
    fn test_bare_message_body() {
        let error = r#"{"message":"Something went wrong"}"#;
        let formatted = format_api_error(error);
        assert_eq!(formatted, "Something went wrong");
    }

    #[test]
    fn test_format_null_code_falls_back_to_type() {
        let error = r#"HTTP 400: {"error":{"message":"Bad model","type":"invalid_request_error","code":null}}"#;
        assert_eq!(
            format_api_error(error),
            "HTTP 400: Bad model (type: invalid_request_error)"
        );
    }

    #[test]
    fn test_format_unknown_json_shape() {
        let error = r#"HTTP 502: {"detail":"bad gateway"}"#;
        assert_eq!(format_api_error(error), error);
    }

    #[test]
    fn test_plain_text_unchanged() {
        let error = "Connection refused";
        let formatted = format_api_error(error);
        assert_eq!(formatted, "Connection refused");
    }

    #[test]
    fn test_invalid_json_unchanged() {
        let error = "HTTP 500: {invalid json}";
        let formatted = format_api_error(error);
        assert_eq!(formatted, "HTTP 500: {invalid json}");
    }
}
