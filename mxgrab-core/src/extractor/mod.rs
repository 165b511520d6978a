//! Manifest discovery on a loaded page.
//!
//! Strategies run in a fixed order and the first one yielding at least one
//! candidate wins. When every strategy comes back empty the page is reloaded,
//! settled again and the whole sequence repeats under a [`RetryPolicy`].
//! Individual strategy failures are logged and treated as "nothing found".

mod helper;
mod patterns;
mod retry;
mod strategy;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserResult, PageProbe};
use crate::config::ExtractorSection;
use crate::control::ControlWatch;

pub use helper::{HelperRunner, SystemHelperRunner};
pub use patterns::{find_manifest_urls, is_http_url, is_manifest_url, CandidateSet};
pub use retry::{RetryOutcome, RetryPolicy};
pub use strategy::Strategy;

use helper::{helper_probe_args, parse_helper_output};
use strategy::{
    play_activation_script, resource_timing_script, scroll_script, MEDIA_ELEMENT_SOURCES,
    PLAYER_RUNTIME_SOURCES,
};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub candidates: Vec<String>,
    pub strategy: Option<Strategy>,
    pub attempts: usize,
    pub cancelled: bool,
}

pub struct ManifestExtractor {
    config: ExtractorSection,
    retry: RetryPolicy,
    helper: Option<PathBuf>,
    runner: Arc<dyn HelperRunner>,
}

impl ManifestExtractor {
    pub fn new(config: ExtractorSection, helper: Option<PathBuf>) -> Self {
        let runner = Arc::new(SystemHelperRunner::new(Duration::from_secs(
            config.helper_timeout_seconds.max(1),
        )));
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            helper,
            runner,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn HelperRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn extract(
        &self,
        page: &dyn PageProbe,
        source_url: &str,
        control: &ControlWatch,
    ) -> Vec<String> {
        self.extract_with_report(page, source_url, control)
            .await
            .candidates
    }

    pub async fn extract_with_report(
        &self,
        page: &dyn PageProbe,
        source_url: &str,
        control: &ControlWatch,
    ) -> ExtractionReport {
        let outcome = self
            .retry
            .run(control, |attempt| {
                self.run_attempt(page, source_url, control, attempt)
            })
            .await;

        let (strategy, candidates) = match outcome.result {
            Some((strategy, candidates)) => (Some(strategy), candidates),
            None => (None, Vec::new()),
        };
        info!(
            url = source_url,
            attempts = outcome.attempts,
            candidates = candidates.len(),
            strategy = ?strategy,
            cancelled = outcome.cancelled,
            "manifest extraction finished"
        );
        ExtractionReport {
            candidates,
            strategy,
            attempts: outcome.attempts,
            cancelled: outcome.cancelled,
        }
    }

    async fn run_attempt(
        &self,
        page: &dyn PageProbe,
        source_url: &str,
        control: &ControlWatch,
        attempt: usize,
    ) -> Option<(Strategy, Vec<String>)> {
        if attempt > 0 {
            debug!(attempt, "reloading page before retry");
            if let Err(err) = page.reload().await {
                warn!(attempt, error = %err, "page reload failed");
            }
        }
        if !self.settle(page, control).await {
            return None;
        }

        for strategy in Strategy::ORDER {
            if control.is_cancelled() {
                debug!(%strategy, "extraction cancelled");
                return None;
            }
            match self.run_strategy(strategy, page, source_url).await {
                Ok(found) => {
                    let mut set = CandidateSet::new();
                    set.extend(found);
                    if !set.is_empty() {
                        debug!(%strategy, attempt, count = set.len(), "strategy produced candidates");
                        return Some((strategy, set.into_vec()));
                    }
                }
                Err(err) => {
                    warn!(%strategy, attempt, error = %err, "extraction strategy failed");
                }
            }
        }
        None
    }

    /// Scrolls, pokes the player and waits a randomized interval so lazy
    /// requests have a chance to fire. Returns false when cancelled.
    async fn settle(&self, page: &dyn PageProbe, control: &ControlWatch) -> bool {
        let (scroll, wait) = {
            let mut rng = rand::thread_rng();
            let [min_px, max_px] = self.config.scroll_px;
            let [min_ms, max_ms] = self.config.settle_wait_ms;
            (
                rng.gen_range(min_px.min(max_px)..=max_px.max(min_px)),
                Duration::from_millis(rng.gen_range(min_ms.min(max_ms)..=max_ms.max(min_ms))),
            )
        };
        if let Err(err) = page.execute(&scroll_script(scroll)).await {
            debug!(error = %err, "scroll failed");
        }
        if !self.config.play_selectors.is_empty() {
            if let Err(err) = page
                .execute(&play_activation_script(&self.config.play_selectors))
                .await
            {
                debug!(error = %err, "play activation failed");
            }
        }
        let mut watch = control.clone();
        retry::wait_or_cancel(&mut watch, wait).await
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        page: &dyn PageProbe,
        source_url: &str,
    ) -> BrowserResult<Vec<String>> {
        match strategy {
            Strategy::NetworkBodies => Ok(page
                .response_bodies()
                .await?
                .iter()
                .flat_map(|body| find_manifest_urls(body))
                .collect()),
            Strategy::PageMarkup => Ok(find_manifest_urls(&page.rendered_markup().await?)),
            Strategy::MediaElements => Ok(page
                .evaluate_strings(MEDIA_ELEMENT_SOURCES)
                .await?
                .into_iter()
                .filter(|src| is_manifest_url(src))
                .collect()),
            Strategy::PlayerRuntime => Ok(page
                .evaluate_strings(PLAYER_RUNTIME_SOURCES)
                .await?
                .into_iter()
                .filter(|src| is_http_url(src))
                .collect()),
            Strategy::ResourceTiming => Ok(page
                .evaluate_strings(&resource_timing_script(&self.config.segment_markers))
                .await?
                .into_iter()
                .filter(|name| is_http_url(name))
                .collect()),
            Strategy::ExternalHelper => self.run_helper(source_url).await,
        }
    }

    async fn run_helper(&self, source_url: &str) -> BrowserResult<Vec<String>> {
        let Some(helper) = self.helper.as_ref().filter(|_| self.config.helper_fallback) else {
            return Ok(Vec::new());
        };
        let output = self
            .runner
            .capture(helper, &helper_probe_args(source_url))
            .await
            .map_err(|err| BrowserError::Helper(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output");
            return Err(BrowserError::Helper(format!(
                "{} exited with {}: {detail}",
                helper.display(),
                output.status
            )));
        }
        Ok(parse_helper_output(&output.stdout))
    }
}
