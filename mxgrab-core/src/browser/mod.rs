mod automation;
mod error;
mod fingerprint;
mod page;
mod pool;

pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher, ViewportSpec};
pub use error::{BrowserError, BrowserResult};
pub use fingerprint::AutomationMask;
pub use page::PageProbe;
pub use pool::{BrowserFactory, BrowserHandle, BrowserLease, BrowserPool};
