use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams, RequestId, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{NavigateParams, ReloadParams};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;

use super::error::{BrowserError, BrowserResult};
use super::fingerprint::AutomationMask;
use super::page::PageProbe;
use super::pool::{BrowserFactory, BrowserHandle};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// MIME prefixes whose bodies can never carry a manifest URL.
const SKIPPED_MIME_PREFIXES: &[&str] = &["image/", "video/", "audio/", "font/"];

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserConfig>,
    executable: Option<PathBuf>,
    mask: Arc<AutomationMask>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserConfig, executable: Option<PathBuf>) -> Self {
        let mask = Arc::new(AutomationMask::new(config.fingerprint.clone()));
        Self {
            config: Arc::new(config),
            executable,
            mask,
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let headless = self.config.chromium.headless;
        let chromium_config = self.build_chromium_config(&viewport, &user_agent)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless,
            executable = ?self.executable,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            viewport,
            user_agent,
            mask: Arc::clone(&self.mask),
        })
    }

    fn select_viewport(&self) -> ViewportSpec {
        let section = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let [min_w, max_w] = section.width_range;
        let [min_h, max_h] = section.height_range;
        ViewportSpec {
            width: rng.gen_range(min_w.min(max_w)..=max_w.max(min_w)),
            height: rng.gen_range(min_h.min(max_h)..=max_h.max(min_h)),
            device_scale_factor: section.device_scale_factor,
        }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .pool
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: Some(viewport.device_scale_factor),
            emulating_mobile: false,
            is_landscape: viewport.width >= viewport.height,
            has_touch: false,
        });

        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.chromium.headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(Duration::from_secs(
            self.config.chromium.navigation_timeout_seconds,
        ));

        builder = builder.args(chromium_args(&self.config, viewport, user_agent));
        builder.build().map_err(BrowserError::Configuration)
    }
}

fn chromium_args(config: &BrowserConfig, viewport: &ViewportSpec, user_agent: &str) -> Vec<String> {
    let mut args = vec![
        format!("--user-agent={user_agent}"),
        format!("--window-size={},{}", viewport.width, viewport.height),
    ];
    if config.chromium.disable_gpu {
        args.push("--disable-gpu".into());
    }
    if config.flags.disable_dev_shm_usage {
        args.push("--disable-dev-shm-usage".into());
    }
    if config.flags.disable_extensions {
        args.push("--disable-extensions".into());
    }
    if config.flags.mute_audio {
        args.push("--mute-audio".into());
    }
    if !config.flags.autoplay_policy.is_empty() {
        args.push(format!("--autoplay-policy={}", config.flags.autoplay_policy));
    }
    if let Some(lang) = &config.flags.lang {
        args.push(format!("--lang={lang}"));
    }
    for feature in &config.flags.disable_blink_features {
        args.push(format!("--disable-blink-features={feature}"));
    }
    if config.flags.no_first_run {
        args.push("--no-first-run".into());
    }
    if config.flags.disable_automation_controlled {
        args.push("--disable-features=AutomationControlled".into());
    }
    args.push("--password-store=basic".into());
    args
}

#[async_trait]
impl BrowserFactory for BrowserLauncher {
    type Handle = BrowserAutomation;

    async fn create(&self) -> BrowserResult<BrowserAutomation> {
        self.launch().await
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<BrowserConfig>,
    viewport: ViewportSpec,
    user_agent: String,
    mask: Arc<AutomationMask>,
}

impl BrowserAutomation {
    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;

        let responses = Arc::new(Mutex::new(Vec::new()));
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let sink = Arc::clone(&responses);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let captured = CapturedResponse {
                    request_id: event.request_id.clone(),
                    url: event.response.url.clone(),
                    mime_type: event.response.mime_type.clone(),
                };
                sink.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(captured);
            }
        });

        Ok(BrowserContext {
            page,
            responses,
            listener,
            navigation_timeout: Duration::from_secs(
                self.config.chromium.navigation_timeout_seconds,
            ),
        })
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent).await?;

        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        self.mask.apply(page).await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserHandle for BrowserAutomation {
    type Page = BrowserContext;

    async fn is_alive(&self) -> bool {
        match self.browser.version().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "browser liveness probe failed");
                false
            }
        }
    }

    async fn open_page(&self) -> BrowserResult<BrowserContext> {
        self.new_context().await
    }

    async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Err(err) = self.browser.wait().await {
            warn!(error = %err, "Failed to reap browser process");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CapturedResponse {
    request_id: RequestId,
    url: String,
    mime_type: String,
}

impl CapturedResponse {
    fn may_carry_text(&self) -> bool {
        !SKIPPED_MIME_PREFIXES
            .iter()
            .any(|prefix| self.mime_type.starts_with(prefix))
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
    responses: Arc<Mutex<Vec<CapturedResponse>>>,
    listener: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    fn captured(&self) -> Vec<CapturedResponse> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn clear_captured(&self) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    async fn await_navigation(&self, label: &str) -> BrowserResult<()> {
        tokio::time::timeout(self.navigation_timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::Timeout(label.to_string()))??;
        Ok(())
    }
}

#[async_trait]
impl PageProbe for BrowserContext {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        tokio::time::timeout(self.navigation_timeout, self.page.goto(params))
            .await
            .map_err(|_| BrowserError::Timeout(format!("navigation to {url}")))?
            .map_err(|err| BrowserError::Navigation(err.to_string()))?;
        self.await_navigation("page load").await
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.clear_captured();
        self.page.execute(ReloadParams::default()).await?;
        self.await_navigation("page reload").await
    }

    async fn response_bodies(&self) -> BrowserResult<Vec<String>> {
        let captured = self.captured();
        let mut bodies = Vec::with_capacity(captured.len());
        for response in captured.into_iter().filter(CapturedResponse::may_carry_text) {
            let params = GetResponseBodyParams::new(response.request_id.clone());
            match self.page.execute(params).await {
                Ok(reply) => {
                    let body = &reply.result;
                    if body.base64_encoded {
                        match base64::engine::general_purpose::STANDARD.decode(&body.body) {
                            Ok(bytes) => bodies.push(String::from_utf8_lossy(&bytes).into_owned()),
                            Err(err) => {
                                debug!(url = %response.url, error = %err, "undecodable response body")
                            }
                        }
                    } else {
                        bodies.push(body.body.clone());
                    }
                }
                Err(err) => {
                    debug!(url = %response.url, error = %err, "response body unavailable");
                }
            }
        }
        Ok(bodies)
    }

    async fn rendered_markup(&self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn evaluate_strings(&self, script: &str) -> BrowserResult<Vec<String>> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value::<Vec<String>>()
            .map_err(|err| BrowserError::Script(format!("unexpected script result: {err}")))
    }

    async fn execute(&self, script: &str) -> BrowserResult<()> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.listener.abort();
        self.page.clone().close().await?;
        Ok(())
    }
}
