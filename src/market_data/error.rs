use thiserror::Error;

use crate::retry::{Classify, FailureKind};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {status} - {body}")]
    Status {
        status: u16,
        /// `Retry-After` header in seconds, when the upstream sent one we could parse.
        retry_after: Option<f64>,
        body: String,
    },

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("Batch of {0} token ids exceeds the upstream limit")]
    BatchTooLarge(usize),
}

impl Classify for UpstreamError {
    fn classify(&self) -> FailureKind {
        match self {
            UpstreamError::Transport(e) if e.is_builder() || e.is_decode() => FailureKind::Permanent,
            UpstreamError::Transport(_) => FailureKind::Retryable,
            UpstreamError::Status { status: 429, retry_after, .. } => FailureKind::RateLimited {
                retry_after: *retry_after,
            },
            UpstreamError::Status { status, .. } if *status >= 500 || *status == 408 => {
                FailureKind::Retryable
            }
            UpstreamError::Status { .. } => FailureKind::Permanent,
            UpstreamError::Decode(_) | UpstreamError::BatchTooLarge(_) => FailureKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, retry_after: Option<f64>) -> UpstreamError {
        UpstreamError::Status { status: code, retry_after, body: String::new() }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            status(429, Some(5.0)).classify(),
            FailureKind::RateLimited { retry_after: Some(5.0) }
        );
        assert_eq!(status(429, None).classify(), FailureKind::RateLimited { retry_after: None });
        assert_eq!(status(503, None).classify(), FailureKind::Retryable);
        assert_eq!(status(408, None).classify(), FailureKind::Retryable);
        assert_eq!(status(400, None).classify(), FailureKind::Permanent);
        assert_eq!(status(404, None).classify(), FailureKind::Permanent);
        assert_eq!(UpstreamError::Decode("eof".into()).classify(), FailureKind::Permanent);
    }
}
