//! Start-order gate.
//!
//! Lets one worker hold back the others until it has reached a chosen phase
//! (for example until it owns the lock). This replaces scheduler priority as
//! the way a driver makes start order deterministic.

use tokio::sync::watch;

/// Create a closed gate, returning the side that opens it and the side that
/// waits on it.
#[must_use]
pub fn start_gate() -> (GateOpener, GateWaiter) {
    let (tx, rx) = watch::channel(false);
    (GateOpener { tx }, GateWaiter { rx })
}

/// Opens the gate. Dropping it also opens the gate, so waiters are never
/// stranded by an opener that failed before reaching its phase.
#[derive(Debug)]
pub struct GateOpener {
    tx: watch::Sender<bool>,
}

impl GateOpener {
    /// Open the gate and release every waiter.
    pub fn open(self) {
        self.tx.send_replace(true);
    }
}

impl Drop for GateOpener {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

/// Waits for the gate to open. Clone it to hand to several workers.
#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<bool>,
}

impl GateWaiter {
    /// Suspend until the gate is open. Returns immediately if it already is.
    pub async fn wait(mut self) {
        // The opener always publishes `true` before its sender goes away,
        // so an error here still means the gate is open.
        let _ = self.rx.wait_for(|open| *open).await;
    }

    /// Whether the gate has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_waiter_blocks_until_open() {
        let (opener, waiter) = start_gate();
        assert!(!waiter.is_open());

        let handle = tokio::spawn(waiter.clone().wait());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        opener.open();
        handle.await.unwrap();
        assert!(waiter.is_open());
    }

    #[tokio::test]
    async fn test_dropped_opener_opens_gate() {
        let (opener, waiter) = start_gate();
        drop(opener);
        waiter.clone().wait().await;
        assert!(waiter.is_open());
    }

    #[tokio::test]
    async fn test_wait_after_open_returns_immediately() {
        let (opener, waiter) = start_gate();
        opener.open();
        waiter.wait().await;
    }
}
