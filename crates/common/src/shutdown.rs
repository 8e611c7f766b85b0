//! Cooperative shutdown signal for the worker loops

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Receiving side of the shutdown signal. Cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side, held by whoever decides to stop
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// Signal that trips on Ctrl+C
    pub fn on_ctrl_c() -> Shutdown {
        let (trigger, shutdown) = Self::channel();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            trigger.trigger();
        });
        shutdown
    }

    /// Signal that never trips, for one-shot runs and tests
    pub fn never() -> Shutdown {
        let (trigger, shutdown) = Self::channel();
        std::mem::forget(trigger);
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&mut self) {
        // A dropped sender counts as a request to stop
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration`; returns false if shutdown interrupted the sleep
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}
