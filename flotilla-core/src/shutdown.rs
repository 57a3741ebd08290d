//! Cooperative shutdown signalling.
//!
//! The orchestrator observes the signal between stages and the dispatch
//! scheduler observes it during pacing delays. Cancellation aborts
//! remaining dispatch iterations; teardown still runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Sending half; trigger with [`ShutdownHandle::shutdown`].
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Requests cancellation. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half, observed at stage boundaries and during delays.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for signals that should never fire.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires, for runs without cancellation.
    pub fn none() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `duration`, waking early on cancellation.
    ///
    /// Returns true if cancellation was observed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            cancelled = Self::wait_cancelled(self.rx.clone()) => cancelled,
        }
    }

    async fn wait_cancelled(mut rx: watch::Receiver<bool>) -> bool {
        // Bind the result so the non-Send `watch::Ref` scrutinee is not
        // held across the `pending().await` below.
        let observed = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        if observed {
            true
        } else {
            // Sender dropped without signalling: pend so the sleep wins.
            std::future::pending().await
        }
    }
}

/// Creates a linked shutdown handle and signal.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownHandle { tx },
        ShutdownSignal {
            rx,
            _keepalive: None,
        },
    )
}
