//! Background Reload Monitor
//!
//! Polls the repository's freshness token on an interval and triggers a
//! registry reload when it changes. Cooperative: start, stop and on-demand
//! triggering are all cheap, and stopping joins the thread.

use super::RuleRegistry;
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to a running monitor thread.
///
/// Dropping the handle stops the monitor.
pub struct ReloadMonitor {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReloadMonitor {
    /// Stop the monitor and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Start the background monitor over a registry.
    ///
    /// Every `interval` the repository freshness token is compared with
    /// the last seen one; a change triggers [`RuleRegistry::reload`]. A
    /// failed reload keeps the old generation and is retried on the next
    /// tick (the token is remembered so an unchanged-but-broken catalog
    /// is not re-validated every tick).
    pub fn spawn(registry: Arc<RuleRegistry>, interval: Duration) -> ReloadMonitor {
        let monitoring = registry.monitoring_flag();
        monitoring.store(true, Ordering::Relaxed);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("registry-monitor".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "reload monitor started");
                // The generation serving now reflects the current catalog.
                let mut last_token: Option<u64> = registry.repository().freshness_token().ok();

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    }

                    let token = match registry.repository().freshness_token() {
                        Ok(token) => token,
                        Err(e) => {
                            warn!(error = %e, "freshness poll failed");
                            continue;
                        }
                    };

                    if last_token == Some(token) {
                        debug!(token, "catalog unchanged");
                        continue;
                    }

                    match registry.reload() {
                        Ok(version) => {
                            info!(version, token, "monitor reloaded changed catalog")
                        }
                        Err(e) => warn!(error = %e, "monitor reload failed"),
                    }
                    last_token = Some(token);
                }

                monitoring.store(false, Ordering::Relaxed);
                info!("reload monitor stopped");
            })
            .ok();

        ReloadMonitor { stop_tx, handle }
    }
}

impl Drop for ReloadMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
