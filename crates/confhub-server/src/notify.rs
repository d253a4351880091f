//! Single-slot change signal for one connected client instance.
//!
//! A release marks every instance dirty; the next watch request of that
//! instance consumes the mark. Any number of signals between two polls
//! collapse into one pending mark.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ChangeSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark changes pending. Returns false if a mark was already pending.
    pub fn signal(&self) -> bool {
        let fresh = !self.pending.swap(true, Ordering::AcqRel);
        if fresh {
            self.notify.notify_one();
        }
        fresh
    }

    /// Consume the pending mark, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for a mark and consume it.
    ///
    /// Returns false on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.take() {
                return true;
            }
            // A permit left over from an already consumed mark wakes us
            // without a pending flag; go around and wait again.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn pending_signal_is_returned_at_once() {
        let signal = ChangeSignal::new();
        assert!(signal.signal());
        assert!(signal.wait(Duration::from_secs(5)).await);
        assert!(!signal.is_pending());
    }

    #[tokio::test]
    async fn quiet_wait_times_out() {
        let signal = ChangeSignal::new();
        assert!(!signal.wait(Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn signals_coalesce() {
        let signal = ChangeSignal::new();
        assert!(signal.signal());
        assert!(!signal.signal());
        assert!(!signal.signal());

        assert!(signal.wait(Duration::from_millis(50)).await);
        assert!(!signal.wait(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn stale_permit_does_not_wake_waiter() {
        let signal = ChangeSignal::new();
        signal.signal();
        assert!(signal.take());
        // The permit stored by the first signal is still there.
        assert!(!signal.wait(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn signal_wakes_blocked_waiter() {
        let signal = Arc::new(ChangeSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        signal.signal();
        assert!(waiter.await.unwrap());
    }
}
