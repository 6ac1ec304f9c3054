//! Error types shared by the task handlers and the remote collaborators.

use thiserror::Error;

use crate::file_ref::FileRefError;
use crate::retry::{Classify, ErrorClassification};

/// Sub-status reported by the auth endpoints while a device authorization is
/// still waiting for the user.
pub const SUB_STATUS_AUTHORIZATION_PENDING: u32 = 1002;
/// Sub-status reported when the access token has expired.
pub const SUB_STATUS_TOKEN_EXPIRED: u32 = 11003;

/// Errors produced while fetching, executing or reporting offline tasks.
#[derive(Debug, Error)]
pub enum OfflinerError {
    #[error("Request failed with status {status}: {message}")]
    Http {
        status: u16,
        sub_status: Option<u32>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("License error: {0}")]
    License(#[from] LicenseError),

    #[error("Artwork url missing for {0}")]
    MissingArtwork(String),

    #[error("Malformed task {task_id}: {reason}")]
    MalformedTask { task_id: String, reason: String },

    #[error("Malformed manifest for {resource}: {reason}")]
    MalformedManifest { resource: String, reason: String },

    #[error("Missing configuration: {0}")]
    Configuration(String),

    #[error("File reference error: {0}")]
    FileRef(#[from] FileRefError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task cancelled")]
    Cancelled,
}

/// DRM failures. All of them are terminal for the task that hit them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LicenseError {
    #[error("No license provider configured")]
    MissingProvider,

    #[error("No credentials available for the license request")]
    MissingToken,

    #[error("License server returned an empty payload")]
    EmptyLicense,

    #[error("Media requires a license but no key request was provided")]
    MissingKeyRequest,
}

impl OfflinerError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        OfflinerError::Http {
            status,
            sub_status: None,
            message: message.into(),
        }
    }

    pub fn malformed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        OfflinerError::MalformedTask {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OfflinerError::Cancelled)
    }
}

impl Classify for OfflinerError {
    fn classification(&self) -> ErrorClassification {
        match self {
            OfflinerError::Http {
                sub_status: Some(SUB_STATUS_AUTHORIZATION_PENDING),
                ..
            } => ErrorClassification::AuthorizationPending,
            OfflinerError::Http {
                sub_status: Some(SUB_STATUS_TOKEN_EXPIRED),
                ..
            } => ErrorClassification::TokenExpired,
            OfflinerError::Http { status, .. } if *status >= 500 => {
                ErrorClassification::ServerError(*status)
            }
            OfflinerError::Http { status, .. } => ErrorClassification::ClientError(*status),
            OfflinerError::Transport(_) => ErrorClassification::Transport,
            _ => ErrorClassification::Fatal,
        }
    }
}

impl From<reqwest::Error> for OfflinerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => OfflinerError::http(status.as_u16(), err.to_string()),
            None => OfflinerError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_classification() {
        assert_eq!(
            OfflinerError::http(503, "unavailable").classification(),
            ErrorClassification::ServerError(503)
        );
        assert_eq!(
            OfflinerError::http(404, "not found").classification(),
            ErrorClassification::ClientError(404)
        );
    }

    #[test]
    fn test_sub_status_takes_precedence() {
        let pending = OfflinerError::Http {
            status: 400,
            sub_status: Some(SUB_STATUS_AUTHORIZATION_PENDING),
            message: "authorization_pending".to_string(),
        };
        assert_eq!(
            pending.classification(),
            ErrorClassification::AuthorizationPending
        );

        let expired = OfflinerError::Http {
            status: 401,
            sub_status: Some(SUB_STATUS_TOKEN_EXPIRED),
            message: "expired".to_string(),
        };
        assert_eq!(expired.classification(), ErrorClassification::TokenExpired);
    }

    #[test]
    fn test_local_failures_are_fatal() {
        assert_eq!(
            OfflinerError::from(LicenseError::EmptyLicense).classification(),
            ErrorClassification::Fatal
        );
        assert_eq!(
            OfflinerError::MissingArtwork("track 1".to_string()).classification(),
            ErrorClassification::Fatal
        );
        assert_eq!(
            OfflinerError::Transport("reset".to_string()).classification(),
            ErrorClassification::Transport
        );
    }
}
