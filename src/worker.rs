// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! A minimal background-task seam for the trace sweeper (spec §5).
//!
//! Simplified from the fork-safe pausable worker this crate family usually
//! reaches for: this processor has no fork boundary to survive, so there is
//! nothing here to pause and restart, only to start and cancel.

use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A long-running background task with a single entry point. `run` is
/// expected to loop internally and return only once it observes
/// cancellation.
pub trait Worker: Send + 'static {
    async fn run(&mut self, stop: CancellationToken);
}

/// A worker spawned onto the current Tokio runtime, with the handle needed
/// to stop it and wait for it to finish.
#[derive(Debug)]
pub struct WorkerHandle {
    stop_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `worker` as a task. `worker.run` receives a clone of the
    /// returned handle's cancellation token.
    pub fn spawn<T: Worker>(mut worker: T) -> Self {
        let stop_token = CancellationToken::new();
        let cloned_token = stop_token.clone();
        let handle = tokio::spawn(async move {
            select! {
                _ = worker.run(cloned_token.clone()) => {}
                _ = cloned_token.cancelled() => {}
            }
        });
        WorkerHandle { stop_token, handle }
    }

    /// Signal the worker to stop and wait for its task to finish.
    ///
    /// # Panics
    /// Propagates a panic from the spawned task, mirroring `JoinHandle`'s own
    /// behavior: a task panic is a bug, not a recoverable runtime condition.
    pub async fn shutdown(self) {
        self.stop_token.cancel();
        #[allow(clippy::unwrap_used)]
        self.handle.await.unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingWorker {
        ticks: Arc<AtomicU32>,
    }

    impl Worker for CountingWorker {
        async fn run(&mut self, stop: CancellationToken) {
            loop {
                if stop.is_cancelled() {
                    return;
                }
                self.ticks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_stops_the_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = WorkerHandle::spawn(CountingWorker { ticks: ticks.clone() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;
        let observed = ticks.load(Ordering::SeqCst);
        assert!(observed > 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), observed);
    }
}
