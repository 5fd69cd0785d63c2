//! Lease monitor task
//!
//! Drives any `Lease` on a fixed tick: while not master it attempts an
//! acquire per tick, while master it verifies liveness per tick, and it
//! reports role transitions through a `LeaseListener`. Losing the lease is
//! only reported when it actually happens; an external `stop` never
//! masquerades as a lost lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::Lease;

/// Role transition callbacks, invoked from the monitor task.
///
/// `waiting_for_lease` fires once per waiting episode, not once per failed
/// attempt.
pub trait LeaseListener: Send + Sync {
    fn waiting_for_lease(&self) {}
    fn lease_acquired(&self) {}
    fn lease_lost(&self) {}
}

/// Default tick between lease attempts and liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub struct LeaseMonitor {
    lease: Arc<Mutex<Box<dyn Lease>>>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl LeaseMonitor {
    /// Spawn the monitor task. The first acquisition attempt happens
    /// immediately, subsequent ones every `poll_interval`.
    pub fn start(
        lease: Box<dyn Lease>,
        listener: Arc<dyn LeaseListener>,
        poll_interval: Duration,
    ) -> Self {
        let lease = Arc::new(Mutex::new(lease));
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::run(
            Arc::clone(&lease),
            listener,
            poll_interval,
            stop_rx,
        ));
        Self {
            lease,
            stop_tx,
            handle,
        }
    }

    async fn run(
        lease: Arc<Mutex<Box<dyn Lease>>>,
        listener: Arc<dyn LeaseListener>,
        poll_interval: Duration,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut interval = interval(poll_interval);
        let mut announced_waiting = false;
        let mut stopped = false;

        while !stopped {
            tokio::select! {
                _ = interval.tick() => {
                    let attempt = lease.lock().await.acquire().await;
                    match attempt {
                        Ok(true) => {
                            announced_waiting = false;
                            metrics::counter!("primus.lease.acquired").increment(1);
                            metrics::gauge!("primus.lease.is_master").set(1.0);
                            tracing::info!("lease acquired; this node is now master");
                            listener.lease_acquired();

                            stopped = Self::run_as_master(&lease, &mut interval, &mut stop_rx).await;

                            metrics::gauge!("primus.lease.is_master").set(0.0);
                            if !stopped {
                                metrics::counter!("primus.lease.lost").increment(1);
                                tracing::warn!("lease lost; this node is no longer master");
                                listener.lease_lost();
                            }
                        }
                        Ok(false) => {
                            if !announced_waiting {
                                tracing::info!("waiting for the lease held by another node");
                                listener.waiting_for_lease();
                                announced_waiting = true;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("lease acquisition attempt failed: {:#}", e);
                            if !announced_waiting {
                                listener.waiting_for_lease();
                                announced_waiting = true;
                            }
                        }
                    }
                }
                _ = stop_rx.recv() => {
                    stopped = true;
                }
            }
        }
    }

    /// Returns true when the loop ended because of an external stop, false
    /// when the lease was actually lost.
    async fn run_as_master(
        lease: &Mutex<Box<dyn Lease>>,
        interval: &mut tokio::time::Interval,
        stop_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match lease.lock().await.is_alive().await {
                        Ok(true) => {}
                        Ok(false) => return false,
                        Err(e) => {
                            tracing::warn!("lease liveness check failed: {:#}", e);
                            return false;
                        }
                    }
                }
                _ = stop_rx.recv() => return true,
            }
        }
    }

    /// Ask the monitor task to stop. Idempotent; does not release the lease.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Release the underlying lease, independently of the task lifecycle.
    pub async fn release(&self) {
        self.lease.lock().await.release().await;
    }

    /// Orderly teardown: stop the task, wait for it, release the lease.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            tracing::debug!("monitor task ended abnormally: {}", e);
        }
        self.lease.lock().await.release().await;
    }
}
