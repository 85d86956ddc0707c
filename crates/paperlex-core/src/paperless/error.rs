use reqwest::StatusCode;
use thiserror::Error;

use crate::util::truncate_body;

/// Failures talking to paperless-ngx. Variants carry the request URL so a
/// failed cycle can be traced to the document it was working on.
#[derive(Error, Debug)]
pub enum PaperlessError {
    #[error("paperless rejected the API token (HTTP {status}) for {url}")]
    TokenRejected { status: u16, url: String },

    #[error("Not found in paperless: {url}")]
    NotFound { url: String },

    #[error("paperless kept rate limiting {url} after {retries} retries")]
    RateLimited { url: String, retries: u32 },

    #[error("paperless answered HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Request to paperless failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("PAPERLESS_TOKEN is not usable as a header value")]
    InvalidToken,
}

impl PaperlessError {
    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        let url = url.to_string();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaperlessError::TokenRejected {
                status: status.as_u16(),
                url,
            },
            StatusCode::NOT_FOUND => PaperlessError::NotFound { url },
            _ => PaperlessError::Status {
                status: status.as_u16(),
                url,
                body: truncate_body(body),
            },
        }
    }

    /// HTTP status paperless answered with, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            PaperlessError::TokenRejected { status, .. } | PaperlessError::Status { status, .. } => Some(*status),
            PaperlessError::NotFound { .. } => Some(404),
            PaperlessError::RateLimited { .. } => Some(429),
            PaperlessError::Transport(e) => e.status().map(|s| s.as_u16()),
            PaperlessError::Decode { .. } | PaperlessError::InvalidToken => None,
        }
    }
}
