use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot latch: `fire` is idempotent, `wait` resolves once fired.
///
/// Used for signals that must be delivered at most once per session
/// (target-left, parent stop, connection-established).
#[derive(Debug, Default)]
pub struct Latch {
    fired: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the latch. Returns true only for the first caller.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Waits until the latch fires. Returns immediately if already fired.
    pub async fn wait(&self) {
        loop {
            if self.is_fired() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering so a concurrent fire() is not missed.
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}
