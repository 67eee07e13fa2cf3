//! Cooperative shutdown for bridge loops
//!
//! One [`ShutdownTrigger`] fans out to any number of [`ShutdownSignal`]s.
//! A dropped trigger counts as triggered.

use std::time::Duration;
use tokio::sync::watch;

/// Owner side of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Create a new, untriggered trigger
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal every subscriber to stop
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check if shutdown was requested
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a new subscriber
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check without waiting
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is requested
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown comes first
    ///
    /// Returns `true` if shutdown was requested.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if tokio::time::timeout(duration, self.triggered()).await.is_ok() {
            return true;
        }
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_all_signals() {
        let trigger = ShutdownTrigger::new();
        let mut a = trigger.signal();
        let b = trigger.signal();
        assert!(!a.is_triggered());

        trigger.trigger();
        a.triggered().await;
        assert!(b.is_triggered());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_after_trigger_is_triggered() {
        let trigger = ShutdownTrigger::new();
        trigger.trigger();
        assert!(trigger.signal().is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let trigger = ShutdownTrigger::new();
        let mut signal = trigger.signal();
        drop(trigger);
        signal.triggered().await;
        assert!(signal.is_triggered());
        assert!(signal.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted() {
        let trigger = ShutdownTrigger::new();
        let mut signal = trigger.signal();
        assert!(!signal.sleep(Duration::from_millis(10)).await);

        let handle = tokio::spawn(async move { signal.sleep(Duration::from_secs(60)).await });
        trigger.trigger();
        assert!(handle.await.unwrap());
    }
}
