//! The manager-wide concurrency gate: a bounded admission queue of capacity
//! `maxJobRunning`. Holding a permit is the only way to be executing; no
//! other lock guards "am I allowed to run right now".
//!
//! Modeled as a `tokio::sync::Semaphore` rather than a hand-rolled
//! `mpsc::channel::<()>` buffer — both are bounded message-passing buffers
//! used as a counting semaphore, but the semaphore gives RAII release via
//! its guard instead of a manual send-back-on-drop.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Clone)]
pub struct Gate {
    inner: Arc<Semaphore>,
}

pub struct GateGuard<'a> {
    _permit: SemaphorePermit<'a>,
}

impl Gate {
    pub fn new(max_job_running: usize) -> Self {
        Self { inner: Arc::new(Semaphore::new(max_job_running.max(1))) }
    }

    /// Blocks (asynchronously) until a slot is free, matching "acquiring the
    /// gate is a blocking receive on a free slot".
    pub async fn acquire(&self) -> GateGuard<'_> {
        let permit = self
            .inner
            .acquire()
            .await
            .expect("gate semaphore is never closed");
        GateGuard { _permit: permit }
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_concurrent_holders_at_capacity() {
        let gate = Gate::new(2);
        let g1 = gate.acquire().await;
        let g2 = gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);
        drop(g1);
        assert_eq!(gate.available_permits(), 1);
        drop(g2);
        assert_eq!(gate.available_permits(), 2);
    }
}
