//! Stop handle for a running reactor.
//!
//! The handle can be cloned into any thread. The reactor side holds a
//! [`StopSignal`] and finishes its accept loop once the handle fires.

use std::sync::Arc;

use tokio::sync::watch;

/// Cross-thread handle that stops one reactor instance.
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ReactorHandle {
    /// Create a handle together with the signal the reactor listens on.
    pub fn pair() -> (Self, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, StopSignal { rx })
    }

    /// Ask the reactor to stop. Returns `false` if it was already gone.
    pub fn stop(&self) -> bool {
        self.tx.send_replace(true);
        !self.tx.is_closed()
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Reactor side of a [`ReactorHandle`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once a stop was requested or every handle was dropped.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
