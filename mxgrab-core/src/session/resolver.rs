use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::{BrowserFactory, BrowserHandle, BrowserPool, PageProbe};
use crate::control::ControlWatch;
use crate::events::ProgressObserver;
use crate::extractor::{ExtractionReport, ManifestExtractor};

use super::error::{SessionError, SessionResult};

/// Turns a page URL into ordered manifest candidates.
#[async_trait]
pub trait ManifestResolver: Send + Sync {
    async fn resolve(
        &self,
        source_url: &str,
        control: &ControlWatch,
        observer: &dyn ProgressObserver,
    ) -> SessionResult<Vec<String>>;

    /// Releases cached resources. Safe to call more than once.
    async fn shutdown(&self) {}
}

/// Resolver backed by a pooled headless browser and the manifest extractor.
pub struct BrowserResolver<F: BrowserFactory> {
    pool: BrowserPool<F>,
    extractor: ManifestExtractor,
}

impl<F: BrowserFactory> BrowserResolver<F> {
    pub fn new(pool: BrowserPool<F>, extractor: ManifestExtractor) -> Self {
        Self { pool, extractor }
    }

    pub fn pool(&self) -> &BrowserPool<F> {
        &self.pool
    }

    /// Loads the page and runs extraction, returning the full report.
    pub async fn probe(
        &self,
        source_url: &str,
        control: &ControlWatch,
        observer: &dyn ProgressObserver,
    ) -> SessionResult<ExtractionReport> {
        observer.on_progress(0.1, "Starting Chrome...");
        let lease = self
            .pool
            .acquire()
            .await
            .map_err(|err| SessionError::BrowserLaunch(err.to_string()))?;

        let page = match lease.open_page().await {
            Ok(page) => page,
            Err(err) => {
                warn!(error = %err, "failed to open page, dropping cached browser");
                lease.invalidate().await;
                return Err(SessionError::BrowserLaunch(err.to_string()));
            }
        };

        if control.is_cancelled() {
            close_page(&page).await;
            return Err(SessionError::Cancelled);
        }

        observer.on_progress(0.2, "Navigating to page...");
        if let Err(err) = page.navigate(source_url).await {
            if !lease.is_alive().await {
                close_page(&page).await;
                lease.invalidate().await;
                return Err(SessionError::BrowserLaunch(err.to_string()));
            }
            warn!(url = source_url, error = %err, "navigation incomplete, extracting from partial load");
        }

        observer.on_progress(0.3, "Extracting video information...");
        let report = self
            .extractor
            .extract_with_report(&page, source_url, control)
            .await;
        close_page(&page).await;
        drop(lease);

        info!(
            url = source_url,
            attempts = report.attempts,
            found = report.candidates.len(),
            "page resolved"
        );
        Ok(report)
    }
}

async fn close_page<P: PageProbe>(page: &P) {
    if let Err(err) = page.close().await {
        warn!(error = %err, "failed to close page");
    }
}

#[async_trait]
impl<F: BrowserFactory> ManifestResolver for BrowserResolver<F> {
    async fn resolve(
        &self,
        source_url: &str,
        control: &ControlWatch,
        observer: &dyn ProgressObserver,
    ) -> SessionResult<Vec<String>> {
        let report = self.probe(source_url, control, observer).await?;
        if report.cancelled {
            return Err(SessionError::Cancelled);
        }
        if report.candidates.is_empty() {
            return Err(SessionError::ExtractionExhausted {
                attempts: report.attempts,
            });
        }
        Ok(report.candidates)
    }

    async fn shutdown(&self) {
        self.pool.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserError, BrowserResult};
    use crate::config::{ExtractorSection, RetrySection};
    use crate::control::SessionControl;
    use crate::events::{NoopObserver, ProgressEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticPage {
        body: String,
    }

    #[async_trait]
    impl PageProbe for StaticPage {
        async fn navigate(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn reload(&self) -> BrowserResult<()> {
            Ok(())
        }
        async fn response_bodies(&self) -> BrowserResult<Vec<String>> {
            Ok(vec![self.body.clone()])
        }
        async fn rendered_markup(&self) -> BrowserResult<String> {
            Ok(String::new())
        }
        async fn evaluate_strings(&self, _script: &str) -> BrowserResult<Vec<String>> {
            Ok(vec![])
        }
        async fn execute(&self, _script: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn close(&self) -> BrowserResult<()> {
            Ok(())
        }
    }

    struct StaticBrowser {
        body: String,
    }

    #[async_trait]
    impl BrowserHandle for StaticBrowser {
        type Page = StaticPage;

        async fn is_alive(&self) -> bool {
            true
        }
        async fn open_page(&self) -> BrowserResult<StaticPage> {
            Ok(StaticPage {
                body: self.body.clone(),
            })
        }
        async fn shutdown(self) -> BrowserResult<()> {
            Ok(())
        }
    }

    struct StaticFactory {
        body: String,
        fail: bool,
        launches: AtomicUsize,
    }

    #[async_trait]
    impl BrowserFactory for StaticFactory {
        type Handle = StaticBrowser;

        async fn create(&self) -> BrowserResult<StaticBrowser> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BrowserError::Launch("chrome missing".into()));
            }
            Ok(StaticBrowser {
                body: self.body.clone(),
            })
        }
    }

    fn resolver(body: &str, fail: bool) -> BrowserResolver<StaticFactory> {
        let config = ExtractorSection {
            retry: RetrySection {
                max_attempts: 2,
                backoff_ms: vec![5],
                jitter_ms: 0,
            },
            settle_wait_ms: [1, 2],
            helper_fallback: false,
            ..ExtractorSection::default()
        };
        BrowserResolver::new(
            BrowserPool::new(StaticFactory {
                body: body.to_string(),
                fail,
                launches: AtomicUsize::new(0),
            }),
            ManifestExtractor::new(config, None),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_candidates_and_reports_phases() {
        let resolver = resolver(r#"{"u":"https://cdn.example/a.m3u8"}"#, false);
        let control = SessionControl::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
        let candidates = resolver
            .resolve("https://www.mxplayer.in/show/x", &control.watch(), &tx)
            .await
            .unwrap();
        assert_eq!(candidates, vec!["https://cdn.example/a.m3u8".to_string()]);

        let mut fractions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            fractions.push(event.fraction);
        }
        assert_eq!(fractions, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_is_exhausted() {
        let resolver = resolver("{}", false);
        let control = SessionControl::new();
        let err = resolver
            .resolve("https://www.mxplayer.in/show/x", &control.watch(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ExtractionExhausted { attempts: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_maps_to_browser_error() {
        let resolver = resolver("{}", true);
        let control = SessionControl::new();
        let err = resolver
            .resolve("https://www.mxplayer.in/show/x", &control.watch(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::BrowserLaunch(_)));
        assert!(!resolver.pool().is_cached().await);
    }

    #[tokio::test(start_paused = true)]
    async fn browser_is_reused_across_resolutions() {
        let resolver = resolver(r#"https://cdn.example/a.mpd"#, false);
        let control = SessionControl::new();
        for _ in 0..2 {
            resolver
                .resolve("https://www.mxplayer.in/show/x", &control.watch(), &NoopObserver)
                .await
                .unwrap();
        }
        assert_eq!(resolver.pool().factory().launches.load(Ordering::SeqCst), 1);
        resolver.shutdown().await;
        assert!(!resolver.pool().is_cached().await);
    }

    #[tokio::test]
    async fn cancelled_before_navigation() {
        let resolver = resolver("https://cdn.example/a.mpd", false);
        let control = SessionControl::new();
        control.cancel();
        let err = resolver
            .resolve("https://www.mxplayer.in/show/x", &control.watch(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
    }
}
