use std::time::Duration;

use thiserror::Error;

use crate::util::truncate_body;

/// Why an authentication attempt produced no session.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Login rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Challenge solve timed out after {0:?}")]
    ChallengeTimeout(Duration),

    #[error("Challenge solver unavailable: {0}")]
    ChallengeUnavailable(String),

    #[error("Challenge solve failed: {0}")]
    Challenge(String),

    #[error("Login response unusable: {0}")]
    Malformed(String),

    #[error("No authentication strategy configured")]
    Exhausted,
}

impl AuthError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status } => Some(*status),
            AuthError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Failure side of an `UploadResult`.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No lexoffice session and no credentials to create one")]
    AuthUnavailable,

    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    VendorRejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    #[error("Could not read document content: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        UploadError::VendorRejected {
            status: status.as_u16(),
            body: truncate_body(body),
        }
    }

    /// HTTP status behind the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::VendorRejected { status, .. } => Some(*status),
            UploadError::AuthFailed(e) => e.status(),
            UploadError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The vendor's only signal that the session is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, UploadError::VendorRejected { status: 401, .. })
    }
}
