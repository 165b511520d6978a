//! Session lifecycle: validation, manifest resolution, download supervision
//! and artifact hand-off for one request at a time.

mod controller;
mod error;
mod model;
mod resolver;
mod validation;

pub use controller::SessionController;
pub use error::{FailureKind, SessionError, SessionResult};
pub use model::{SessionSnapshot, SessionStatus};
pub use resolver::{BrowserResolver, ManifestResolver};
pub use validation::SourceValidator;
