//! Admission gate for inbound requests
//!
//! Open while the service runs. Closing it rejects new requests with
//! `ShuttingDown`; `drain` then waits for admitted ones to finish.

use crate::error::{ProvisionError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counts in-flight requests and refuses new ones after `close`
#[derive(Debug)]
pub struct RequestGate {
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Admission ticket; dropping it marks the request finished
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a RequestGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}

impl RequestGate {
    /// Create an open gate
    pub fn new() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Admit a request
    pub fn enter(&self) -> Result<GateGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = GateGuard { gate: self };
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ProvisionError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Stop admitting requests
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Whether new requests are admitted
    pub fn is_open(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Requests currently admitted
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no request is in flight. Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_closed_gate_rejects() {
        let gate = RequestGate::new();
        assert!(gate.enter().is_ok());
        gate.close();
        assert!(matches!(gate.enter(), Err(ProvisionError::ShuttingDown)));
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let gate = Arc::new(RequestGate::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _guard = gate.enter().unwrap();
                let _ = rx.await;
            })
        };
        while gate.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        gate.close();
        assert!(!gate.drain(Duration::from_millis(50)).await);

        tx.send(()).unwrap();
        assert!(gate.drain(Duration::from_secs(1)).await);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_idle_gate_returns_immediately() {
        let gate = RequestGate::new();
        gate.close();
        assert!(gate.drain(Duration::from_millis(10)).await);
    }
}
