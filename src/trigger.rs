// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Trigger-coalescing single-flight reconciliation loop.
//!
//! Change notifications arrive in bursts from many watchers, but a
//! reconciliation pass replays everything anyway, so at most one wakeup
//! needs to be pending at any time. `TriggerHandle::poke` stores a single
//! permit; `run_loop` drains it, runs the pass, and retries failed passes
//! with exponential backoff until the shutdown signal fires.

use crate::constants::retry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Create a connected trigger pair.
pub fn channel() -> (TriggerHandle, Trigger) {
    let notify = Arc::new(Notify::new());
    (TriggerHandle(notify.clone()), Trigger(notify))
}

/// Cloneable producer side. Any number of watchers may poke it.
#[derive(Clone)]
pub struct TriggerHandle(Arc<Notify>);

impl TriggerHandle {
    /// Request a reconciliation pass. Bursts collapse to one pending wakeup.
    pub fn poke(&self) {
        self.0.notify_one();
    }
}

/// Consumer side, owned by the reconciliation loop.
pub struct Trigger(Arc<Notify>);

impl Trigger {
    /// Wait until at least one poke has happened since the last call.
    pub async fn triggered(&mut self) {
        self.0.notified().await;
    }
}

/// Drive `reconcile` once per coalesced trigger.
///
/// A failed pass is retried with doubling delay (capped) until it succeeds;
/// success resets the delay. The shutdown signal exits the loop without
/// starting a new pass, including out of a backoff sleep.
pub async fn run_loop<F, Fut>(
    mut trigger: Trigger,
    mut shutdown: watch::Receiver<bool>,
    mut reconcile: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<()>>,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = trigger.triggered() => {}
        }

        let mut delay = Duration::from_secs(retry::BASE_SECS);
        while let Err(e) = reconcile().await {
            warn!("Reconciliation failed: {}, retrying in {:?}", e, delay);

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(Duration::from_secs(retry::MAX_SECS));
        }
        debug!("Reconciliation pass complete");
    }
}

/// Readiness gate: one receiver per watcher, fired when its initial
/// listing is complete.
pub struct CacheSync {
    receivers: Vec<tokio::sync::oneshot::Receiver<()>>,
}

impl CacheSync {
    pub fn new() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    pub fn push(&mut self, receiver: tokio::sync::oneshot::Receiver<()>) {
        self.receivers.push(receiver);
    }

    /// Wait for every watcher to report its caches synced.
    ///
    /// Returns false if the shutdown signal fired first (or a watcher died
    /// before syncing), in which case the caller must not start its loop.
    pub async fn wait(self, shutdown: &mut watch::Receiver<bool>) -> bool {
        for receiver in self.receivers {
            tokio::select! {
                _ = shutdown.changed() => return false,
                synced = receiver => {
                    if synced.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl Default for CacheSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_poke_wakes_waiter() {
        let (handle, mut trigger) = channel();
        handle.poke();
        timeout(Duration::from_millis(100), trigger.triggered())
            .await
            .expect("trigger should fire");
    }

    #[tokio::test]
    async fn test_burst_coalesces_to_one_wakeup() {
        let (handle, mut trigger) = channel();
        handle.poke();
        handle.poke();
        handle.poke();

        timeout(Duration::from_millis(100), trigger.triggered())
            .await
            .expect("first wakeup");

        // The burst collapsed into the permit we just consumed
        assert!(
            timeout(Duration::from_millis(50), trigger.triggered())
                .await
                .is_err(),
            "no second wakeup should be pending"
        );
    }

    #[tokio::test]
    async fn test_poke_after_drain_wakes_again() {
        let (handle, mut trigger) = channel();
        handle.poke();
        trigger.triggered().await;

        handle.poke();
        timeout(Duration::from_millis(100), trigger.triggered())
            .await
            .expect("second wakeup after fresh poke");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_retries_until_success() {
        let (handle, trigger) = channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let attempts = Arc::new(AtomicUsize::new(0));

        handle.poke();

        let counter = attempts.clone();
        let loop_task = tokio::spawn(run_loop(trigger, shutdown_rx, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(crate::error::CustodianError::BundleDecode(
                        "transient".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }));

        // Two failures back off 1s then 2s under virtual time
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        loop_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_shutdown_aborts_backoff() {
        let (handle, trigger) = channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let attempts = Arc::new(AtomicUsize::new(0));

        handle.poke();

        let counter = attempts.clone();
        let loop_task = tokio::spawn(run_loop(trigger, shutdown_rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::CustodianError::BundleDecode(
                    "always failing".to_string(),
                ))
            }
        }));

        // Let the first attempt run, then shut down mid-backoff
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown_tx.send(true).unwrap();
        loop_task.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_sync_waits_for_all() {
        let (tx_a, rx_a) = tokio::sync::oneshot::channel();
        let (tx_b, rx_b) = tokio::sync::oneshot::channel();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut caches = CacheSync::new();
        caches.push(rx_a);
        caches.push(rx_b);

        tx_a.send(()).unwrap();
        tx_b.send(()).unwrap();

        assert!(caches.wait(&mut shutdown_rx).await);
    }

    #[tokio::test]
    async fn test_cache_sync_aborts_on_shutdown() {
        let (_tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut caches = CacheSync::new();
        caches.push(rx);

        shutdown_tx.send(true).unwrap();
        assert!(!caches.wait(&mut shutdown_rx).await);
    }
}
