//! Host tool discovery.
//!
//! Every tool is resolved in the same order: explicit override (environment
//! variable first, then config file), the executable search path, then a fixed
//! list of well-known install locations for the current platform.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ToolsSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// yt-dlp, fetches the manifest-described stream.
    DownloadHelper,
    /// ffmpeg, used by the helper to remux segments.
    RemuxTool,
    Browser,
    BrowserDriver,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::DownloadHelper,
        Tool::RemuxTool,
        Tool::Browser,
        Tool::BrowserDriver,
    ];

    pub fn env_var(self) -> &'static str {
        match self {
            Tool::DownloadHelper => "YTDLP_PATH",
            Tool::RemuxTool => "FFMPEG_PATH",
            Tool::Browser => "CHROME_PATH",
            Tool::BrowserDriver => "CHROMEDRIVER_PATH",
        }
    }

    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Tool::DownloadHelper => &["yt-dlp"],
            Tool::RemuxTool => &["ffmpeg"],
            Tool::Browser => &[
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
                "chrome",
            ],
            Tool::BrowserDriver => &["chromedriver"],
        }
    }

    /// Whether a session can run without it.
    pub fn is_required(self) -> bool {
        matches!(self, Tool::DownloadHelper | Tool::RemuxTool)
    }

    #[cfg(windows)]
    fn known_locations(self) -> Vec<PathBuf> {
        match self {
            Tool::DownloadHelper => vec![PathBuf::from("yt-dlp.exe")],
            Tool::RemuxTool => vec![PathBuf::from("ffmpeg.exe")],
            Tool::Browser => vec![
                PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
                PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
            ],
            Tool::BrowserDriver => vec![PathBuf::from("chromedriver.exe")],
        }
    }

    #[cfg(not(windows))]
    fn known_locations(self) -> Vec<PathBuf> {
        let raw: &[&str] = match self {
            Tool::DownloadHelper => &[
                "/usr/bin/yt-dlp",
                "/usr/local/bin/yt-dlp",
                "/opt/homebrew/bin/yt-dlp",
                "/app/bin/yt-dlp",
            ],
            Tool::RemuxTool => &[
                "/usr/bin/ffmpeg",
                "/usr/local/bin/ffmpeg",
                "/opt/homebrew/bin/ffmpeg",
                "/app/bin/ffmpeg",
            ],
            Tool::Browser => &[
                "./chrome-linux/chrome",
                "/usr/bin/google-chrome",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            ],
            Tool::BrowserDriver => &[
                "./chromedriver/chromedriver",
                "/usr/bin/chromedriver",
                "/usr/local/bin/chromedriver",
            ],
        };
        raw.iter().map(PathBuf::from).collect()
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tool::DownloadHelper => "yt-dlp",
            Tool::RemuxTool => "ffmpeg",
            Tool::Browser => "chrome",
            Tool::BrowserDriver => "chromedriver",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Override,
    SearchPath,
    KnownLocation,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{tool} not found (override, search path and known locations exhausted)")]
pub struct NotFound {
    pub tool: Tool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub required: bool,
    pub path: Option<PathBuf>,
    pub source: Option<ToolSource>,
}

/// Resolves tool executables on the host. Holds only the overrides; every call
/// re-inspects the filesystem.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    helper: Option<PathBuf>,
    remux: Option<PathBuf>,
    browser: Option<PathBuf>,
    driver: Option<PathBuf>,
    search_path: Option<std::ffi::OsString>,
    skip_known_locations: bool,
}

impl ToolLocator {
    pub fn from_config(section: &ToolsSection) -> Self {
        let pick = |tool: Tool, configured: &Option<String>| -> Option<PathBuf> {
            let from_env = if section.read_env {
                std::env::var_os(tool.env_var())
                    .filter(|value| !value.is_empty())
                    .map(PathBuf::from)
            } else {
                None
            };
            from_env.or_else(|| configured.as_ref().map(PathBuf::from))
        };
        Self {
            helper: pick(Tool::DownloadHelper, &section.helper_path),
            remux: pick(Tool::RemuxTool, &section.remux_path),
            browser: pick(Tool::Browser, &section.browser_path),
            driver: pick(Tool::BrowserDriver, &section.driver_path),
            search_path: None,
            skip_known_locations: false,
        }
    }

    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        let path = Some(path.into());
        match tool {
            Tool::DownloadHelper => self.helper = path,
            Tool::RemuxTool => self.remux = path,
            Tool::Browser => self.browser = path,
            Tool::BrowserDriver => self.driver = path,
        }
        self
    }

    /// Replaces `PATH` for lookups; an empty value disables search-path lookup.
    pub fn with_search_path(mut self, paths: impl Into<std::ffi::OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    fn override_for(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::DownloadHelper => self.helper.as_deref(),
            Tool::RemuxTool => self.remux.as_deref(),
            Tool::Browser => self.browser.as_deref(),
            Tool::BrowserDriver => self.driver.as_deref(),
        }
    }

    /// Restricts lookup to overrides and the search path.
    pub fn without_known_locations(mut self) -> Self {
        self.skip_known_locations = true;
        self
    }

    pub fn locate(&self, tool: Tool) -> Result<PathBuf, NotFound> {
        self.locate_with_source(tool).map(|(path, _)| path)
    }

    pub fn locate_with_source(&self, tool: Tool) -> Result<(PathBuf, ToolSource), NotFound> {
        if let Some(path) = self.override_for(tool) {
            if path.is_file() {
                return Ok((path.to_path_buf(), ToolSource::Override));
            }
            warn!(%tool, path = %path.display(), "configured override does not exist, falling back");
        }

        for name in tool.binary_names() {
            if let Some(path) = self.search(name) {
                debug!(%tool, path = %path.display(), "found on search path");
                return Ok((path, ToolSource::SearchPath));
            }
        }

        if self.skip_known_locations {
            return Err(NotFound { tool });
        }
        tool.known_locations()
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|path| (path, ToolSource::KnownLocation))
            .ok_or(NotFound { tool })
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) if paths.is_empty() => None,
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(name, Some(paths), cwd).ok()
            }
            None => which::which(name).ok(),
        }
    }

    pub fn report(&self) -> Vec<ToolStatus> {
        Tool::ALL
            .iter()
            .map(|&tool| match self.locate_with_source(tool) {
                Ok((path, source)) => ToolStatus {
                    tool,
                    required: tool.is_required(),
                    path: Some(path),
                    source: Some(source),
                },
                Err(_) => ToolStatus {
                    tool,
                    required: tool.is_required(),
                    path: None,
                    source: None,
                },
            })
            .collect()
    }
}
