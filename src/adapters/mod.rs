//! Typed clients for the external collaborators: the LLM provider, the
//! vector-index service, and the document-generation service.
//!
//! Adapters attribute every failure to the error taxonomy (transient,
//! rate-limited, not-found, fatal) so the retry policy upstream can act on
//! `Error::is_transient` alone.

pub mod docgen;
pub mod llm;
#[cfg(test)]
pub mod mock;
pub mod vector;

pub use docgen::{DocGenerator, DocJobState, DocJobStatus, DocOptions, HttpDocGenerator};
pub use llm::{ChatMessage, Completion, CompletionRequest, HttpLanguageModel, LanguageModel, Usage};
pub use vector::{HttpVectorIndex, IndexDocument, ScoredChunk, VectorIndex};

use crate::error::Error;
use reqwest::StatusCode;
use std::time::Duration;

/// Join a path onto a base URL without `Url::join`'s replace-last-segment
/// behavior (base URLs here routinely carry a path like `/v1`).
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Map an HTTP error status to the taxonomy. `retry_after` is the parsed
/// Retry-After header, when the server sent one.
pub(crate) fn attribute_status(
    service: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> Error {
    let detail = body.chars().take(200).collect::<String>();
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited {
            message: format!("{} returned 429: {}", service, detail),
            retry_after,
        }
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(format!("{}: {}", service, detail))
    } else if status.is_server_error() {
        Error::Transient(format!("{} returned {}: {}", service, status, detail))
    } else {
        Error::Fatal(format!("{} returned {}: {}", service, status, detail))
    }
}

/// Parse a Retry-After header value (delta-seconds form only).
pub(crate) fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(
            endpoint("https://api.example.com/v1", "chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://localhost:8003/", "/search"),
            "http://localhost:8003/search"
        );
    }

    #[test]
    fn test_attribute_status() {
        let err = attribute_status("llm", StatusCode::TOO_MANY_REQUESTS, "slow down", None);
        assert!(err.is_transient());
        assert!(matches!(err, Error::RateLimited { .. }));

        let err = attribute_status("llm", StatusCode::BAD_GATEWAY, "", None);
        assert!(err.is_transient());

        let err = attribute_status("llm", StatusCode::UNAUTHORIZED, "bad key", None);
        assert!(!err.is_transient());
        assert!(matches!(err, Error::Fatal(_)));

        let err = attribute_status("vector", StatusCode::NOT_FOUND, "no index", None);
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        use reqwest::header::HeaderValue;
        let value = HeaderValue::from_static("12");
        assert_eq!(
            parse_retry_after(Some(&value)),
            Some(Duration::from_secs(12))
        );
        let junk = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&junk)), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
