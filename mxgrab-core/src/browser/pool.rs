use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::error::BrowserResult;
use super::page::PageProbe;

/// A running browser instance.
#[async_trait]
pub trait BrowserHandle: Send + Sync + 'static {
    type Page: PageProbe;

    /// Cheap round-trip proving the instance still answers.
    async fn is_alive(&self) -> bool;

    async fn open_page(&self) -> BrowserResult<Self::Page>;

    async fn shutdown(self) -> BrowserResult<()>;
}

#[async_trait]
pub trait BrowserFactory: Send + Sync + 'static {
    type Handle: BrowserHandle;

    async fn create(&self) -> BrowserResult<Self::Handle>;
}

/// Owns at most one browser handle. Callers borrow it through a lease that keeps
/// the pool locked, so two sessions never drive the same instance and renewal
/// or teardown cannot race.
pub struct BrowserPool<F: BrowserFactory> {
    factory: F,
    slot: Arc<AsyncMutex<Option<F::Handle>>>,
}

impl<F: BrowserFactory> BrowserPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub async fn acquire(&self) -> BrowserResult<BrowserLease<F::Handle>> {
        let mut guard = Arc::clone(&self.slot).lock_owned().await;
        if let Some(handle) = guard.as_ref() {
            if handle.is_alive().await {
                debug!("reusing cached browser instance");
                return Ok(BrowserLease { guard });
            }
            warn!("cached browser failed liveness check, relaunching");
            if let Some(stale) = guard.take() {
                if let Err(err) = stale.shutdown().await {
                    debug!(error = %err, "stale browser shutdown reported error");
                }
            }
        }
        let handle = self.factory.create().await?;
        info!("browser instance launched");
        *guard = Some(handle);
        Ok(BrowserLease { guard })
    }

    /// Shuts the cached instance down, if any. Safe to call repeatedly.
    pub async fn release(&self) {
        let handle = self.slot.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.shutdown().await {
                warn!(error = %err, "browser shutdown reported error");
            }
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

pub struct BrowserLease<H: BrowserHandle> {
    guard: OwnedMutexGuard<Option<H>>,
}

impl<H: BrowserHandle> BrowserLease<H> {
    /// Drops the leased instance from the pool so the next acquire relaunches.
    pub async fn invalidate(mut self) {
        if let Some(handle) = self.guard.take() {
            if let Err(err) = handle.shutdown().await {
                debug!(error = %err, "invalidated browser shutdown reported error");
            }
        }
    }
}

impl<H: BrowserHandle> Deref for BrowserLease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        // acquire fills the slot before building a lease; only invalidate
        // empties it, and invalidate consumes the lease
        self.guard
            .as_ref()
            .expect("lease is only handed out while the slot holds a handle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::error::BrowserError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        launched: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct FakeHandle {
        alive: Arc<AtomicBool>,
        counters: Arc<Counters>,
    }

    struct FakePage;

    #[async_trait]
    impl PageProbe for FakePage {
        async fn navigate(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn reload(&self) -> BrowserResult<()> {
            Ok(())
        }
        async fn response_bodies(&self) -> BrowserResult<Vec<String>> {
            Ok(vec![])
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

    #[async_trait]
    impl BrowserHandle for FakeHandle {
        type Page = FakePage;

        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn open_page(&self) -> BrowserResult<FakePage> {
            Ok(FakePage)
        }

        async fn shutdown(self) -> BrowserResult<()> {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        alive: Arc<AtomicBool>,
        counters: Arc<Counters>,
        fail: AtomicBool,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                alive: Arc::new(AtomicBool::new(true)),
                counters: Arc::new(Counters::default()),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl BrowserFactory for FakeFactory {
        type Handle = FakeHandle;

        async fn create(&self) -> BrowserResult<FakeHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrowserError::Launch("no chrome".into()));
            }
            self.counters.launched.fetch_add(1, Ordering::SeqCst);
            self.alive.store(true, Ordering::SeqCst);
            Ok(FakeHandle {
                alive: Arc::clone(&self.alive),
                counters: Arc::clone(&self.counters),
            })
        }
    }

    #[tokio::test]
    async fn live_handle_is_reused() {
        let pool = BrowserPool::new(FakeFactory::new());
        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.factory().counters.launched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dead_handle_is_replaced() {
        let pool = BrowserPool::new(FakeFactory::new());
        drop(pool.acquire().await.unwrap());
        pool.factory().alive.store(false, Ordering::SeqCst);
        let lease = pool.acquire().await.unwrap();
        assert!(lease.is_alive().await);
        let counters = &pool.factory().counters;
        assert_eq!(counters.launched.load(Ordering::SeqCst), 2);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = BrowserPool::new(FakeFactory::new());
        drop(pool.acquire().await.unwrap());
        pool.release().await;
        pool.release().await;
        assert!(!pool.is_cached().await);
        assert_eq!(pool.factory().counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidated_lease_empties_the_slot() {
        let pool = BrowserPool::new(FakeFactory::new());
        let lease = pool.acquire().await.unwrap();
        lease.invalidate().await;
        assert!(!pool.is_cached().await);
    }

    #[tokio::test]
    async fn launch_failure_propagates() {
        let factory = FakeFactory::new();
        factory.fail.store(true, Ordering::SeqCst);
        let pool = BrowserPool::new(factory);
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, BrowserError::Launch(_)));
        assert!(!pool.is_cached().await);
    }
}
