use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GrabberConfig {
    pub paths: PathsSection,
    pub sources: SourcesSection,
    pub tools: ToolsSection,
    pub browser: BrowserConfig,
    pub extractor: ExtractorSection,
    pub download: DownloadSection,
}

impl GrabberConfig {
    /// Directory under which session scratch directories are created.
    pub fn staging_dir(&self) -> PathBuf {
        self.paths
            .staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<()> {
        let [start, end] = self.download.progress_range;
        if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start > end {
            return Err(ConfigError::Invalid {
                field: "download.progress_range",
                reason: format!("expected 0 <= start <= end <= 1, got [{start}, {end}]"),
            });
        }
        if self.sources.allow.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sources.allow",
                reason: "at least one allow pattern is required".into(),
            });
        }
        if self.extractor.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "extractor.retry.max_attempts",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub staging_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    pub allow: Vec<String>,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            allow: vec![r"^https://www\.mxplayer\.in/.*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub helper_path: Option<String>,
    pub remux_path: Option<String>,
    pub browser_path: Option<String>,
    pub driver_path: Option<String>,
    /// Honour `YTDLP_PATH`, `FFMPEG_PATH`, `CHROME_PATH` and `CHROMEDRIVER_PATH`.
    pub read_env: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            helper_path: None,
            remux_path: None,
            browser_path: None,
            driver_path: None,
            read_env: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub fingerprint: FingerprintSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub navigation_timeout_seconds: u64,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            disable_gpu: true,
            navigation_timeout_seconds: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub disable_dev_shm_usage: bool,
    pub disable_extensions: bool,
    pub mute_audio: bool,
    pub autoplay_policy: String,
    pub lang: Option<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            no_first_run: true,
            disable_automation_controlled: true,
            disable_blink_features: vec!["AutomationControlled".to_string()],
            disable_dev_shm_usage: true,
            disable_extensions: true,
            mute_audio: true,
            autoplay_policy: "no-user-gesture-required".to_string(),
            lang: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

impl Default for UserAgentSection {
    fn default() -> Self {
        Self {
            pool: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewportSection {
    pub width_range: [u32; 2],
    pub height_range: [u32; 2],
    pub device_scale_factor: f64,
}

impl Default for ViewportSection {
    fn default() -> Self {
        Self {
            width_range: [1024, 1920],
            height_range: [768, 1080],
            device_scale_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    pub hide_webdriver: bool,
    pub spoof_plugins: bool,
    pub spoof_chrome_runtime: bool,
    pub languages: Vec<String>,
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            hide_webdriver: true,
            spoof_plugins: true,
            spoof_chrome_runtime: true,
            languages: vec!["en-US".to_string(), "en".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSection {
    pub retry: RetrySection,
    pub settle_wait_ms: [u64; 2],
    pub scroll_px: [u32; 2],
    pub segment_markers: Vec<String>,
    pub play_selectors: Vec<String>,
    pub helper_fallback: bool,
    pub helper_timeout_seconds: u64,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            retry: RetrySection::default(),
            settle_wait_ms: [3000, 7000],
            scroll_px: [100, 300],
            segment_markers: vec![
                "master".to_string(),
                "playlist".to_string(),
                "manifest".to_string(),
                "chunklist".to_string(),
                ".m3u8".to_string(),
                ".mpd".to_string(),
            ],
            play_selectors: vec![
                "button[aria-label*='Play' i]".to_string(),
                ".vjs-big-play-button".to_string(),
                ".jw-icon-playback".to_string(),
                "[class*='play-button']".to_string(),
            ],
            helper_fallback: true,
            helper_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub backoff_ms: Vec<u64>,
    pub jitter_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![1000, 2000],
            jitter_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub retries: u32,
    pub limit_rate: Option<String>,
    pub buffer_size: Option<String>,
    pub min_artifact_bytes: u64,
    pub progress_range: [f64; 2],
    pub file_prefix: String,
    pub extra_args: Vec<String>,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            retries: 3,
            limit_rate: Some("2M".to_string()),
            buffer_size: Some("16K".to_string()),
            min_artifact_bytes: 10_000,
            progress_range: [0.5, 0.9],
            file_prefix: "mxplayer_video".to_string(),
            extra_args: Vec::new(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GrabberConfig> {
    let config: GrabberConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/mxgrab.toml");
        let config = load_config(path).expect("fixture config should parse");
        assert_eq!(config.download.min_artifact_bytes, 10_000);
        assert_eq!(config.download.progress_range, [0.5, 0.9]);
        assert_eq!(config.extractor.retry.max_attempts, 3);
        assert!(config.browser.user_agents.pool.len() >= 2);
        assert!(config.browser.chromium.headless);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: GrabberConfig = toml::from_str(
            r#"
            [download]
            min_artifact_bytes = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.download.min_artifact_bytes, 42);
        assert_eq!(config.download.retries, 3);
        assert_eq!(config.sources.allow.len(), 1);
        assert!(config.tools.read_env);
    }

    #[test]
    fn rejects_inverted_progress_range() {
        let mut config = GrabberConfig::default();
        config.download.progress_range = [0.9, 0.5];
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "download.progress_range",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert!(path.ends_with("here.toml")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
