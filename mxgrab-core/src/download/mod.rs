//! Download helper subprocess supervision.
//!
//! One helper process per session. Its output is consumed line by line and
//! `[download] n%` lines are remapped onto the configured progress range. A
//! pause stops consuming output (the process keeps running); a cancel kills the
//! process and always reaps it before reporting.

mod command;
mod error;
mod progress;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DownloadSection;
use crate::control::{ControlSignal, ControlWatch, SessionControl};
use crate::events::ProgressObserver;

pub use command::build_helper_args;
pub use error::{DownloadError, DownloadResult};
pub use progress::{is_error_line, parse_progress_percent, ProgressRange};

const GENERIC_FAILURE: &str = "Download failed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { path: PathBuf, bytes: u64 },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Downloader {
    helper: PathBuf,
    remux_tool: PathBuf,
    section: DownloadSection,
}

impl Downloader {
    pub fn new(helper: PathBuf, remux_tool: PathBuf, section: DownloadSection) -> Self {
        Self {
            helper,
            remux_tool,
            section,
        }
    }

    pub fn progress_range(&self) -> ProgressRange {
        ProgressRange::from(self.section.progress_range)
    }

    pub fn args_for(&self, manifest_url: &str, output: &Path) -> Vec<String> {
        build_helper_args(&self.section, &self.remux_tool, manifest_url, output)
    }

    /// Spawns the helper and returns immediately; the process is supervised on
    /// a background task driven by `control`.
    pub fn start(
        &self,
        manifest_url: &str,
        output: &Path,
        control: SessionControl,
        observer: Arc<dyn ProgressObserver>,
    ) -> DownloadResult<DownloadHandle> {
        let args = self.args_for(manifest_url, output);
        debug!(program = %self.helper.display(), ?args, "spawning download helper");
        let mut child = Command::new(&self.helper)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DownloadError::Spawn {
                program: self.helper.clone(),
                source,
            })?;

        let pid = child.id();
        let stdout = child.stdout.take().ok_or(DownloadError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(DownloadError::MissingPipe("stderr"))?;
        info!(pid = ?pid, url = manifest_url, output = %output.display(), "download helper started");

        let supervisor = Supervisor {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            watch: control.watch(),
            observer,
            range: self.progress_range(),
            fraction: self.progress_range().start(),
            last_error: None,
            output: output.to_path_buf(),
            min_bytes: self.section.min_artifact_bytes,
        };
        let task = tokio::spawn(supervisor.run());

        Ok(DownloadHandle { control, task, pid })
    }
}

pub struct DownloadHandle {
    control: SessionControl,
    task: JoinHandle<DownloadResult<DownloadOutcome>>,
    pid: Option<u32>,
}

impl DownloadHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> DownloadResult<DownloadOutcome> {
        self.task.await?
    }
}

struct Supervisor {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    watch: ControlWatch,
    observer: Arc<dyn ProgressObserver>,
    range: ProgressRange,
    fraction: f64,
    last_error: Option<String>,
    output: PathBuf,
    min_bytes: u64,
}

impl Supervisor {
    async fn run(mut self) -> DownloadResult<DownloadOutcome> {
        let mut stdout_done = false;
        let mut stderr_done = false;

        let status = loop {
            match self.watch.current() {
                ControlSignal::Cancel => return self.terminate().await,
                ControlSignal::Pause => {
                    info!(fraction = self.fraction, "download paused");
                    self.observer.on_progress(
                        self.fraction,
                        &format!("Paused at: {:.1}%", self.fraction * 100.0),
                    );
                    if self.watch.wait_while_paused().await == ControlSignal::Cancel {
                        return self.terminate().await;
                    }
                    info!(fraction = self.fraction, "download resumed");
                    self.observer.on_progress(self.fraction, "Download resumed...");
                    continue;
                }
                ControlSignal::Run => {}
            }

            tokio::select! {
                signal = self.watch.changed() => {
                    if signal == ControlSignal::Cancel {
                        return self.terminate().await;
                    }
                }
                line = self.stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => self.handle_line(&line),
                    Ok(None) => stdout_done = true,
                    Err(err) => {
                        warn!(error = %err, "error reading helper stdout");
                        stdout_done = true;
                    }
                },
                line = self.stderr.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => {
                        debug!(target: "mxgrab::helper", "{line}");
                        self.handle_line(&line);
                    }
                    Ok(None) => stderr_done = true,
                    Err(err) => {
                        warn!(error = %err, "error reading helper stderr");
                        stderr_done = true;
                    }
                },
                status = self.child.wait(), if stdout_done && stderr_done => {
                    break status.map_err(|source| DownloadError::Io {
                        path: self.output.clone(),
                        source,
                    })?;
                }
            }
        };

        if !status.success() {
            let detail = self
                .last_error
                .take()
                .unwrap_or_else(|| GENERIC_FAILURE.to_string());
            warn!(code = ?status.code(), %detail, "download helper failed");
            return Err(DownloadError::Failed {
                code: status.code(),
                detail,
            });
        }

        let bytes = match tokio::fs::metadata(&self.output).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(DownloadError::Io {
                    path: self.output.clone(),
                    source,
                })
            }
        };
        if bytes < self.min_bytes {
            warn!(bytes, minimum = self.min_bytes, "downloaded artifact too small");
            return Err(DownloadError::ArtifactInvalid {
                path: self.output.clone(),
                size: bytes,
                minimum: self.min_bytes,
            });
        }
        info!(bytes, path = %self.output.display(), "download finished");
        Ok(DownloadOutcome::Completed {
            path: self.output.clone(),
            bytes,
        })
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(percent) = parse_progress_percent(line) {
            let next = self.range.remap(percent);
            if next >= self.fraction {
                self.fraction = next;
                self.observer
                    .on_progress(self.fraction, &format!("Downloading: {percent:.1}%"));
            }
        } else if is_error_line(line) {
            self.last_error = Some(line.trim().to_string());
        }
    }

    async fn terminate(mut self) -> DownloadResult<DownloadOutcome> {
        info!(pid = ?self.child.id(), "cancelling download helper");
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "helper already exited");
        }
        if let Err(err) = self.child.wait().await {
            warn!(error = %err, "failed to reap download helper");
        }
        Ok(DownloadOutcome::Cancelled)
    }
}
