//! Shutdown signal shared by every wait in the resilience layer
//!
//! Backoff waits and recovery wait-and-retest steps must abort promptly when
//! emergency shutdown fires. Async callers watch a latched `bool` on a
//! [`watch`] channel; blocking callers park on a condition variable. Both
//! observe the same trigger.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable, one-shot cancellation signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    fired_tx: Arc<watch::Sender<bool>>,
    blocking: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (fired_tx, _) = watch::channel(false);
        Self {
            fired_tx: Arc::new(fired_tx),
            blocking: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking every pending wait
    pub fn trigger(&self) {
        self.fired_tx.send_replace(true);
        let (lock, cvar) = &*self.blocking;
        // A poisoned flag still gets set: shutdown must never be lost
        let mut fired = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *fired = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.fired_tx.borrow()
    }

    /// Resolves once the signal fires
    pub async fn triggered(&self) {
        let mut fired_rx = self.fired_tx.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = fired_rx.wait_for(|fired| *fired).await;
    }

    /// Async wait. Returns `true` if the full duration elapsed, `false` if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = self.triggered() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Blocking wait. Returns `true` if the full duration elapsed, `false` if cancelled.
    pub fn sleep_blocking(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.blocking;
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (fired, _timeout) = cvar
            .wait_timeout_while(guard, duration, |fired| !*fired)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !*fired
    }

    /// Receiver for callers composing their own `select!`
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.fired_tx.subscribe()
    }
}
