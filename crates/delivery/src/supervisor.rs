//! Long-loop lifecycle: shared shutdown signal and bounded teardown.
//!
//! Every background loop owns a clone of [`Shutdown`] and observes it
//! at the top of its select. The [`Supervisor`] collects their join
//! handles and enforces the hard cap on graceful shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cooperative shutdown signal.
#[derive(Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flip the signal and wake every waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Sleep for `duration` unless shutdown fires first.
    /// Returns true when the loop should exit.
    pub async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }
}

/// Owns the background loops of one worker process.
pub struct Supervisor {
    shutdown: Arc<Shutdown>,
    shutdown_cap: Duration,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(shutdown_cap: Duration) -> Self {
        Self {
            shutdown: Shutdown::new(),
            shutdown_cap,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Spawn and register a named loop.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "background loop started");
        self.handles.push((name, tokio::spawn(future)));
    }

    /// Trigger shutdown and wait for every loop, within the cap.
    /// Loops still running at the deadline are aborted.
    pub async fn shutdown_and_wait(self) {
        self.shutdown.trigger();

        let deadline = tokio::time::Instant::now() + self.shutdown_cap;
        for (name, handle) in self.handles {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => info!(task = %name, "background loop stopped"),
                Ok(Err(e)) => warn!(task = %name, error = %e, "background loop panicked"),
                Err(_) => {
                    abort.abort();
                    warn!(task = %name, "background loop exceeded shutdown cap, aborted");
                }
            }
        }
    }
}
