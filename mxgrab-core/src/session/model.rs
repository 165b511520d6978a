use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{FailureKind, SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Resolving,
    Downloading,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Cancelled | SessionStatus::Completed | SessionStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Downloading)
                | (Resolving, Failed)
                | (Resolving, Cancelled)
                | (Downloading, Paused)
                | (Downloading, Completed)
                | (Downloading, Cancelled)
                | (Downloading, Failed)
                | (Paused, Downloading)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Resolving => "resolving",
            SessionStatus::Downloading => "downloading",
            SessionStatus::Paused => "paused",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a session for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub source_url: String,
    pub status: SessionStatus,
    pub progress: f64,
    pub status_message: String,
    pub output_path: Option<PathBuf>,
    pub manifest_candidates: Vec<String>,
    pub error_detail: Option<String>,
    pub failure: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct Session {
    id: Uuid,
    source_url: String,
    status: SessionStatus,
    progress: f64,
    status_message: String,
    output_path: Option<PathBuf>,
    manifest_candidates: Vec<String>,
    error_detail: Option<String>,
    failure: Option<FailureKind>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scratch: Option<TempDir>,
}

impl Session {
    pub(crate) fn new(source_url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_url,
            status: SessionStatus::Idle,
            progress: 0.0,
            status_message: String::new(),
            output_path: None,
            manifest_candidates: Vec::new(),
            error_detail: None,
            failure: None,
            created_at: now,
            updated_at: now,
            scratch: None,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn transition(&mut self, action: &'static str, next: SessionStatus) -> SessionResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                action,
                status: self.status,
            });
        }
        debug!(session = %self.id, from = %self.status, to = %next, "session transition");
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Records a progress update. The fraction never moves backwards.
    pub(crate) fn advance(&mut self, fraction: f64, message: &str) {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
        }
        self.status_message = message.to_string();
        self.touch();
    }

    pub(crate) fn set_candidates(&mut self, candidates: Vec<String>) {
        self.manifest_candidates = candidates;
        self.touch();
    }

    pub(crate) fn attach_artifact(&mut self, scratch: TempDir, output_path: PathBuf) {
        self.scratch = Some(scratch);
        self.output_path = Some(output_path);
        self.touch();
    }

    pub(crate) fn complete(&mut self, message: &str) -> SessionResult<()> {
        self.transition("complete", SessionStatus::Completed)?;
        self.advance(1.0, message);
        Ok(())
    }

    /// Moves to `failed`, discarding any partial artifact. The detail is never
    /// left empty.
    pub(crate) fn fail(&mut self, error: &SessionError) {
        let mut detail = error.user_message();
        if detail.trim().is_empty() {
            detail = error.to_string();
        }
        if let Err(err) = self.transition("fail", SessionStatus::Failed) {
            warn!(session = %self.id, error = %err, "forcing failed state");
            self.status = SessionStatus::Failed;
        }
        self.failure = Some(error.failure_kind());
        self.status_message = detail.clone();
        self.error_detail = Some(detail);
        self.discard_artifact();
        self.touch();
    }

    pub(crate) fn cancel(&mut self, message: &str) -> SessionResult<()> {
        self.transition("cancel", SessionStatus::Cancelled)?;
        self.progress = 0.0;
        self.status_message = message.to_string();
        self.discard_artifact();
        Ok(())
    }

    /// Hands the scratch directory to the caller, clearing `output_path`.
    pub(crate) fn take_artifact(&mut self) -> Option<(PathBuf, TempDir)> {
        let path = self.output_path.take()?;
        let scratch = self.scratch.take()?;
        self.touch();
        Some((path, scratch))
    }

    pub(crate) fn discard_artifact(&mut self) {
        self.output_path = None;
        if let Some(scratch) = self.scratch.take() {
            let location = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                warn!(path = %location.display(), error = %err, "failed to remove session scratch directory");
            }
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            status: self.status,
            progress: self.progress,
            status_message: self.status_message.clone(),
            output_path: self.output_path.clone(),
            manifest_candidates: self.manifest_candidates.clone(),
            error_detail: self.error_detail.clone(),
            failure: self.failure,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.discard_artifact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolving() -> Session {
        let mut session = Session::new("https://www.mxplayer.in/show/x".into());
        session.transition("submit", SessionStatus::Resolving).unwrap();
        session
    }

    #[test]
    fn progress_never_decreases() {
        let mut session = resolving();
        session.advance(0.3, "Extracting video information...");
        session.advance(0.2, "late update");
        assert_eq!(session.snapshot().progress, 0.3);
        assert_eq!(session.snapshot().status_message, "late update");
    }

    #[test]
    fn pause_only_from_downloading() {
        let mut session = resolving();
        let err = session.transition("pause", SessionStatus::Paused).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                action: "pause",
                status: SessionStatus::Resolving
            }
        ));
        assert_eq!(session.status(), SessionStatus::Resolving);
    }

    #[test]
    fn failure_always_has_detail_and_removes_scratch() {
        let mut session = resolving();
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().to_path_buf();
        session.attach_artifact(scratch, dir.join("out.mp4"));
        session.transition("download", SessionStatus::Downloading).unwrap();
        session.fail(&SessionError::DownloadFailed(String::new()));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(!snapshot.error_detail.unwrap().is_empty());
        assert_eq!(snapshot.failure, Some(FailureKind::DownloadFailed));
        assert!(snapshot.output_path.is_none());
        assert!(!dir.exists());
    }

    #[test]
    fn cancel_resets_progress() {
        let mut session = resolving();
        session.transition("download", SessionStatus::Downloading).unwrap();
        session.advance(0.7, "Downloading: 50.0%");
        session.transition("pause", SessionStatus::Paused).unwrap();
        session.cancel("Download cancelled by user.").unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
        assert_eq!(snapshot.progress, 0.0);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        for status in [
            SessionStatus::Cancelled,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(!status.can_transition_to(SessionStatus::Downloading));
            assert!(!status.can_transition_to(SessionStatus::Resolving));
        }
    }
}
