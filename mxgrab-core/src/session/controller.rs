use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::GrabberConfig;
use crate::control::{ControlSignal, SessionControl};
use crate::download::{DownloadOutcome, Downloader};
use crate::environment::{Tool, ToolLocator};
use crate::error::Result as ConfigResult;
use crate::events::{NoopObserver, ProgressObserver};

use super::error::{SessionError, SessionResult};
use super::model::{Session, SessionSnapshot, SessionStatus};
use super::resolver::ManifestResolver;
use super::validation::SourceValidator;

const MSG_PREPARING: &str = "Preparing to download...";
const MSG_DOWNLOADING: &str = "Downloading video...";
const MSG_COMPLETE: &str = "Download complete!";
const MSG_CANCELLED: &str = "Download cancelled by user.";

/// Drives one session at a time from submission to a terminal state.
///
/// State is only mutated by the session's worker task and by the control
/// methods here; callers observe it through [`SessionController::snapshot`] or
/// a progress observer passed at submission.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: GrabberConfig,
    validator: SourceValidator,
    locator: ToolLocator,
    resolver: Arc<dyn ManifestResolver>,
    state: Mutex<Option<Session>>,
    active: AsyncMutex<Option<ActiveRun>>,
}

struct ActiveRun {
    control: SessionControl,
    done: watch::Receiver<()>,
    task: JoinHandle<()>,
}

impl SessionController {
    pub fn new(
        config: GrabberConfig,
        locator: ToolLocator,
        resolver: Arc<dyn ManifestResolver>,
    ) -> ConfigResult<Self> {
        let validator = SourceValidator::new(&config.sources)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                validator,
                locator,
                resolver,
                state: Mutex::new(None),
                active: AsyncMutex::new(None),
            }),
        })
    }

    pub async fn submit(&self, source_url: &str) -> SessionResult<Uuid> {
        self.submit_with_observer(source_url, Arc::new(NoopObserver))
            .await
    }

    /// Validates `source_url` and starts a session. Nothing is created when the
    /// URL is rejected or a previous session has not been reset.
    pub async fn submit_with_observer(
        &self,
        source_url: &str,
        observer: Arc<dyn ProgressObserver>,
    ) -> SessionResult<Uuid> {
        let url = self.inner.validator.validate(source_url)?;
        let mut active = self.inner.active.lock().await;

        let (id, control) = {
            let mut state = self.inner.lock_state();
            if state.is_some() {
                return Err(SessionError::Busy);
            }
            let mut session = Session::new(url.clone());
            session.transition("submit", SessionStatus::Resolving)?;
            let id = session.id();
            *state = Some(session);
            (id, SessionControl::new())
        };
        info!(session = %id, url = %url, "session submitted");

        let (done_tx, done) = watch::channel(());
        let worker = Worker {
            inner: Arc::clone(&self.inner),
            observer: SessionObserver {
                inner: Arc::clone(&self.inner),
                external: observer,
            },
            control: control.clone(),
            url,
        };
        let task = tokio::spawn(async move {
            worker.run().await;
            drop(done_tx);
        });
        *active = Some(ActiveRun {
            control,
            done,
            task,
        });
        Ok(id)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.lock_state().as_ref().map(Session::snapshot)
    }

    pub fn status(&self) -> SessionStatus {
        self.inner
            .lock_state()
            .as_ref()
            .map(Session::status)
            .unwrap_or(SessionStatus::Idle)
    }

    pub async fn pause(&self) -> SessionResult<()> {
        let control = self.control().await?;
        self.inner
            .with_session(|session| session.transition("pause", SessionStatus::Paused))?;
        control.pause();
        Ok(())
    }

    pub async fn resume(&self) -> SessionResult<()> {
        let control = self.control().await?;
        self.inner.with_session(|session| {
            if session.status() != SessionStatus::Paused {
                return Err(SessionError::InvalidTransition {
                    action: "resume",
                    status: session.status(),
                });
            }
            session.transition("resume", SessionStatus::Downloading)
        })?;
        control.resume();
        Ok(())
    }

    /// Requests cancellation and waits until the worker has torn down the
    /// helper process and discarded the artifact.
    pub async fn cancel(&self) -> SessionResult<()> {
        let control = self.control().await?;
        self.inner.with_session(|session| match session.status() {
            SessionStatus::Resolving | SessionStatus::Downloading | SessionStatus::Paused => Ok(()),
            status => Err(SessionError::InvalidTransition {
                action: "cancel",
                status,
            }),
        })?;
        control.cancel();
        self.wait().await;
        Ok(())
    }

    /// Waits for the current session's worker to finish and returns the final
    /// snapshot.
    pub async fn wait(&self) -> Option<SessionSnapshot> {
        let done = {
            let active = self.inner.active.lock().await;
            active.as_ref().map(|run| run.done.clone())
        };
        if let Some(mut done) = done {
            while done.changed().await.is_ok() {}
        }
        self.snapshot()
    }

    /// Moves the completed artifact to `destination` (a file path, or an
    /// existing directory to place it in) and removes the scratch directory.
    pub async fn deliver(&self, destination: &Path) -> SessionResult<PathBuf> {
        let (source, scratch) = self.inner.with_session(|session| {
            if session.status() != SessionStatus::Completed {
                return Err(SessionError::InvalidTransition {
                    action: "deliver",
                    status: session.status(),
                });
            }
            session.take_artifact().ok_or(SessionError::NoSession)
        })?;

        let target = if destination.is_dir() {
            match source.file_name() {
                Some(name) => destination.join(name),
                None => destination.join("video.mp4"),
            }
        } else {
            destination.to_path_buf()
        };

        match move_file(&source, &target).await {
            Ok(()) => {
                let location = scratch.path().to_path_buf();
                if let Err(err) = scratch.close() {
                    warn!(path = %location.display(), error = %err, "failed to remove scratch directory");
                }
                info!(path = %target.display(), "artifact delivered");
                Ok(target)
            }
            Err(err) => {
                self.inner
                    .with_session(|session| {
                        session.attach_artifact(scratch, source);
                        Ok(())
                    })
                    .ok();
                Err(SessionError::Io(err))
            }
        }
    }

    /// Disposes a terminal session so a new one can be submitted.
    pub async fn reset(&self) -> SessionResult<()> {
        let mut active = self.inner.active.lock().await;
        {
            let mut state = self.inner.lock_state();
            if let Some(session) = state.as_ref() {
                if !session.status().is_terminal() {
                    return Err(SessionError::InvalidTransition {
                        action: "reset",
                        status: session.status(),
                    });
                }
            }
            if let Some(session) = state.take() {
                info!(session = %session.id(), "session reset");
            }
        }
        if let Some(run) = active.take() {
            if let Err(err) = run.task.await {
                error!(error = %err, "session worker ended abnormally");
            }
        }
        Ok(())
    }

    /// Cancels any running session and releases the cached browser.
    pub async fn shutdown(&self) {
        let running = matches!(
            self.status(),
            SessionStatus::Resolving | SessionStatus::Downloading | SessionStatus::Paused
        );
        if running {
            if let Err(err) = self.cancel().await {
                warn!(error = %err, "cancel during shutdown failed");
            }
        }
        self.inner.resolver.shutdown().await;
    }

    async fn control(&self) -> SessionResult<SessionControl> {
        let active = self.inner.active.lock().await;
        active
            .as_ref()
            .map(|run| run.control.clone())
            .ok_or(SessionError::NoSession)
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Session) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let mut state = self.lock_state();
        let session = state.as_mut().ok_or(SessionError::NoSession)?;
        f(session)
    }
}

/// Records progress on the session and forwards it to the caller's observer.
#[derive(Clone)]
struct SessionObserver {
    inner: Arc<Inner>,
    external: Arc<dyn ProgressObserver>,
}

impl SessionObserver {
    fn forward(&self, fraction: f64, message: &str) {
        self.external.on_progress(fraction, message);
    }
}

impl ProgressObserver for SessionObserver {
    fn on_progress(&self, fraction: f64, message: &str) {
        let fraction = {
            let mut state = self.inner.lock_state();
            match state.as_mut() {
                Some(session) if !session.status().is_terminal() => {
                    session.advance(fraction, message);
                    session.snapshot().progress
                }
                _ => return,
            }
        };
        self.forward(fraction, message);
    }
}

struct Worker {
    inner: Arc<Inner>,
    observer: SessionObserver,
    control: SessionControl,
    url: String,
}

impl Worker {
    async fn run(self) {
        let result = honour_cancel(self.drive().await, self.control.current());
        let mut state = self.inner.lock_state();
        let Some(session) = state.as_mut() else {
            return;
        };
        let (fraction, message) = match result {
            Ok(DownloadOutcome::Completed { path, bytes }) => {
                if session.status() == SessionStatus::Paused {
                    // finished between the pause request and the helper noticing it
                    let _ = session.transition("resume", SessionStatus::Downloading);
                }
                match session.complete(MSG_COMPLETE) {
                    Ok(()) => {
                        info!(session = %session.id(), path = %path.display(), bytes, "session completed");
                        (1.0, MSG_COMPLETE.to_string())
                    }
                    Err(err) => {
                        session.fail(&err);
                        (0.0, err.user_message())
                    }
                }
            }
            Ok(DownloadOutcome::Cancelled) | Err(SessionError::Cancelled) => {
                if let Err(err) = session.cancel(MSG_CANCELLED) {
                    warn!(session = %session.id(), error = %err, "cancel after terminal state");
                }
                info!(session = %session.id(), "session cancelled");
                (0.0, MSG_CANCELLED.to_string())
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "session failed");
                session.fail(&err);
                let snapshot = session.snapshot();
                (snapshot.progress, snapshot.error_detail.unwrap_or_default())
            }
        };
        drop(state);
        self.observer.forward(fraction, &message);
    }

    async fn drive(&self) -> SessionResult<DownloadOutcome> {
        let config = &self.inner.config;
        let helper = self.inner.locator.locate(Tool::DownloadHelper)?;
        let remux_tool = self.inner.locator.locate(Tool::RemuxTool)?;

        let watch = self.control.watch();
        let candidates = self
            .inner
            .resolver
            .resolve(&self.url, &watch, &self.observer)
            .await?;
        let manifest = candidates
            .first()
            .cloned()
            .ok_or(SessionError::ExtractionExhausted { attempts: 0 })?;
        self.inner.with_session(|session| {
            session.set_candidates(candidates);
            Ok(())
        })?;
        if watch.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        self.observer.on_progress(0.4, MSG_PREPARING);
        let staging = config.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        let scratch = tempfile::Builder::new()
            .prefix("mxgrab-")
            .tempdir_in(&staging)?;
        let output = scratch.path().join(format!(
            "{}_{}.mp4",
            config.download.file_prefix,
            Utc::now().timestamp()
        ));
        self.inner.with_session(|session| {
            session.attach_artifact(scratch, output.clone());
            session.transition("download", SessionStatus::Downloading)
        })?;

        self.observer.on_progress(0.5, MSG_DOWNLOADING);
        let downloader = Downloader::new(helper, remux_tool, config.download.clone());
        let handle = downloader.start(
            &manifest,
            &output,
            self.control.clone(),
            Arc::new(self.observer.clone()),
        )?;
        info!(pid = ?handle.pid(), manifest = %manifest, "download running");
        Ok(handle.wait().await?)
    }
}

/// A cancel accepted after the helper exited, but before the supervisor saw
/// it, still ends the session as cancelled.
fn honour_cancel(
    result: SessionResult<DownloadOutcome>,
    signal: ControlSignal,
) -> SessionResult<DownloadOutcome> {
    match result {
        Ok(DownloadOutcome::Completed { path, .. }) if signal == ControlSignal::Cancel => {
            info!(path = %path.display(), "download finished after cancel request, discarding");
            Ok(DownloadOutcome::Cancelled)
        }
        other => other,
    }
}

async fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // rename fails across filesystems
            tokio::fs::copy(source, target).await?;
            tokio::fs::remove_file(source).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed() -> SessionResult<DownloadOutcome> {
        Ok(DownloadOutcome::Completed {
            path: PathBuf::from("/tmp/mxplayer_video_1.mp4"),
            bytes: 20_000,
        })
    }

    #[test]
    fn late_cancel_overrides_completion() {
        let outcome = honour_cancel(completed(), ControlSignal::Cancel).unwrap();
        assert_eq!(outcome, DownloadOutcome::Cancelled);
    }

    #[test]
    fn completion_stands_without_cancel() {
        for signal in [ControlSignal::Run, ControlSignal::Pause] {
            let outcome = honour_cancel(completed(), signal).unwrap();
            assert!(matches!(outcome, DownloadOutcome::Completed { bytes: 20_000, .. }));
        }
    }

    #[test]
    fn failures_pass_through() {
        let err = honour_cancel(
            Err(SessionError::DownloadFailed("ERROR: 403".into())),
            ControlSignal::Cancel,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::DownloadFailed(_)));
    }
}
