use serde::Serialize;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::download::DownloadError;
use crate::environment::NotFound;

use super::model::SessionStatus;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid source url: {0}")]
    Validation(String),
    #[error("required tool missing: {0}")]
    ToolMissing(#[from] NotFound),
    #[error("browser unavailable: {0}")]
    BrowserLaunch(String),
    #[error("no manifest found after {attempts} attempt(s)")]
    ExtractionExhausted { attempts: usize },
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("downloaded file is {size} bytes, expected at least {minimum}")]
    ArtifactInvalid { size: u64, minimum: u64 },
    #[error("session cancelled")]
    Cancelled,
    #[error("a session is already active")]
    Busy,
    #[error("cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },
    #[error("no session")]
    NoSession,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable reason a session ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolMissing,
    BrowserLaunch,
    ExtractionExhausted,
    DownloadFailed,
    ArtifactInvalid,
    Internal,
}

impl SessionError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::ToolMissing(_) => FailureKind::ToolMissing,
            SessionError::BrowserLaunch(_) => FailureKind::BrowserLaunch,
            SessionError::ExtractionExhausted { .. } => FailureKind::ExtractionExhausted,
            SessionError::DownloadFailed(_) => FailureKind::DownloadFailed,
            SessionError::ArtifactInvalid { .. } => FailureKind::ArtifactInvalid,
            _ => FailureKind::Internal,
        }
    }

    /// Text shown to the user when the session fails with this error.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::ToolMissing(missing) => {
                format!("{} is not installed or could not be located.", missing.tool)
            }
            SessionError::BrowserLaunch(detail) => format!("Could not start the browser: {detail}"),
            SessionError::ExtractionExhausted { .. } => {
                "Could not find video stream URL.".to_string()
            }
            SessionError::DownloadFailed(detail) => detail.clone(),
            SessionError::ArtifactInvalid { .. } => {
                "Downloaded file is invalid or too small.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<BrowserError> for SessionError {
    fn from(err: BrowserError) -> Self {
        SessionError::BrowserLaunch(err.to_string())
    }
}

impl From<DownloadError> for SessionError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::ArtifactInvalid { size, minimum, .. } => {
                SessionError::ArtifactInvalid { size, minimum }
            }
            DownloadError::Failed { detail, .. } => SessionError::DownloadFailed(detail),
            other => SessionError::DownloadFailed(other.to_string()),
        }
    }
}
