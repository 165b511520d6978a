use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::patterns::is_http_url;

/// Runs an external program to completion and captures its output.
#[async_trait]
pub trait HelperRunner: Send + Sync {
    async fn capture(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

pub struct SystemHelperRunner {
    timeout: Duration,
}

impl SystemHelperRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HelperRunner for SystemHelperRunner {
    async fn capture(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("{} did not finish within {:?}", program.display(), self.timeout),
            )),
        }
    }
}

pub(crate) fn helper_probe_args(source_url: &str) -> Vec<String> {
    vec![
        "--get-url".to_string(),
        "--no-warnings".to_string(),
        "--no-check-certificate".to_string(),
        source_url.to_string(),
    ]
}

/// Each `http(s)` line of the helper's stdout.
pub(crate) fn parse_helper_output(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| is_http_url(line))
        .map(str::to_string)
        .collect()
}
