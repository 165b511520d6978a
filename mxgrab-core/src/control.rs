use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Sending side of a session's pause/cancel channel. Cancel is sticky: once
/// issued, later pause or resume requests are ignored.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: Arc<watch::Sender<ControlSignal>>,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlSignal::Run);
        Self { tx: Arc::new(tx) }
    }

    pub fn pause(&self) -> bool {
        self.transition(ControlSignal::Pause)
    }

    pub fn resume(&self) -> bool {
        self.transition(ControlSignal::Run)
    }

    pub fn cancel(&self) -> bool {
        self.transition(ControlSignal::Cancel)
    }

    pub fn current(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> ControlWatch {
        ControlWatch {
            rx: self.tx.subscribe(),
        }
    }

    fn transition(&self, next: ControlSignal) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ControlSignal::Cancel || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct ControlWatch {
    rx: watch::Receiver<ControlSignal>,
}

impl ControlWatch {
    pub fn current(&self) -> ControlSignal {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.current() == ControlSignal::Cancel
    }

    /// Waits for the next signal change. A dropped sender reads as cancellation.
    pub async fn changed(&mut self) -> ControlSignal {
        match self.rx.changed().await {
            Ok(()) => *self.rx.borrow_and_update(),
            Err(_) => ControlSignal::Cancel,
        }
    }

    /// Returns immediately unless paused; otherwise blocks until resumed or
    /// cancelled.
    pub async fn wait_while_paused(&mut self) -> ControlSignal {
        let mut signal = *self.rx.borrow_and_update();
        while signal == ControlSignal::Pause {
            signal = self.changed().await;
        }
        signal
    }
}
