use std::path::PathBuf;

use thiserror::Error;

pub type DownloadResult<T> = Result<T, DownloadError>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download helper {0} pipe unavailable")]
    MissingPipe(&'static str),
    #[error("download helper exited with {}: {detail}", exit_label(.code))]
    Failed { code: Option<i32>, detail: String },
    #[error("artifact {path} is {size} bytes, expected at least {minimum}")]
    ArtifactInvalid {
        path: PathBuf,
        size: u64,
        minimum: u64,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download task aborted: {0}")]
    Join(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl From<tokio::task::JoinError> for DownloadError {
    fn from(err: tokio::task::JoinError) -> Self {
        DownloadError::Join(err.to_string())
    }
}
