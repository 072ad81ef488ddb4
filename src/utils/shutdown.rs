use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast, time::timeout};

/// Process-level control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSignal {
    /// Stop accepting connections and drain (SIGTERM, SIGINT).
    Shutdown,
    /// Re-read the configuration and swap the route table (SIGHUP).
    Reload,
}

/// Fans OS signals out to the server loop and the reload task.
pub struct SignalHandler {
    tx: broadcast::Sender<ServerSignal>,
    shutdown_initiated: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::with_drain_timeout(Duration::from_secs(30))
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerSignal> {
        self.tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Deliver a signal as if it came from the OS. Shutdown is delivered once.
    pub fn trigger(&self, signal: ServerSignal) {
        if signal == ServerSignal::Shutdown
            && self
                .shutdown_initiated
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            tracing::warn!("Shutdown already initiated, ignoring signal");
            return;
        }
        tracing::info!(?signal, "Delivering server signal");
        // No subscribers is fine; nobody is waiting yet.
        let _ = self.tx.send(signal);
    }

    /// Listen for OS signals until a shutdown arrives.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Signal handler started (SIGINT/SIGTERM shut down, SIGHUP reloads)");
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal as unix_signal};
            let mut sigterm = unix_signal(SignalKind::terminate())
                .wrap_err("Failed to register SIGTERM handler")?;
            let mut sighup = unix_signal(SignalKind::hangup())
                .wrap_err("Failed to register SIGHUP handler")?;
            loop {
                tokio::select! {
                    res = signal::ctrl_c() => {
                        res.wrap_err("Failed to listen for Ctrl+C")?;
                        tracing::info!("Received SIGINT");
                        break;
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                        break;
                    }
                    _ = sighup.recv() => {
                        tracing::info!("Received SIGHUP");
                        self.trigger(ServerSignal::Reload);
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            signal::ctrl_c()
                .await
                .wrap_err("Failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C");
        }
        self.trigger(ServerSignal::Shutdown);
        Ok(())
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }
        loop {
            match receiver.recv().await {
                Ok(ServerSignal::Shutdown) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(ServerSignal::Reload) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }

    /// Give in-flight work `drain_timeout` to finish. Returns false on timeout.
    pub async fn drain<F: std::future::Future>(&self, work: F) -> bool {
        match timeout(self.drain_timeout, work).await {
            Ok(_) => true,
            Err(_) => {
                tracing::error!(
                    timeout = ?self.drain_timeout,
                    "Drain timeout exceeded, forcing shutdown"
                );
                false
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
