use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub fraction: f64,
    pub message: String,
}

/// Receives `(fraction, message)` updates at each meaningful state change.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, fraction: f64, message: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(f64, &str) + Send + Sync,
{
    fn on_progress(&self, fraction: f64, message: &str) {
        self(fraction, message)
    }
}

impl ProgressObserver for UnboundedSender<ProgressEvent> {
    fn on_progress(&self, fraction: f64, message: &str) {
        // receiver gone means nobody is listening anymore
        let _ = self.send(ProgressEvent {
            fraction,
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _fraction: f64, _message: &str) {}
}
