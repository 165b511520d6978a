pub mod browser;
pub mod config;
pub mod control;
pub mod download;
pub mod environment;
pub mod error;
pub mod events;
pub mod extractor;
pub mod session;

pub use config::{load_config, GrabberConfig};
pub use control::{ControlSignal, ControlWatch, SessionControl};
pub use environment::{NotFound, Tool, ToolLocator, ToolSource, ToolStatus};
pub use error::{ConfigError, Result};
pub use events::{NoopObserver, ProgressEvent, ProgressObserver};
pub use session::{
    BrowserResolver, FailureKind, ManifestResolver, SessionController, SessionError,
    SessionResult, SessionSnapshot, SessionStatus,
};
