//! Background tasks
//!
//! Work a handler wants done after its response is sent. Every application
//! provides one `BackgroundTasks` through the container, so handlers take it
//! as `Service<BackgroundTasks>`. The server drains it on shutdown.

use crate::logging::{debug, error, info, warn};
use crate::middleware::panic_message;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;

#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime and return its id.
    ///
    /// Returns `None` once [`close`](Self::close) has been called. A panic
    /// inside the task is logged and does not affect other tasks.
    pub fn spawn<F>(&self, task: F) -> Option<String>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        if self.closed.load(Ordering::Acquire) {
            warn!("Background task rejected, manager is closed");
            return None;
        }
        while set.try_join_next().is_some() {}

        let id = uuid::Uuid::new_v4().to_string();
        let task_id = id.clone();
        set.spawn(async move {
            debug!(task_id = %task_id, "Executing background task");
            let start = Instant::now();
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(()) => info!(
                    task_id = %task_id,
                    latency_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Background task completed"
                ),
                Err(panic) => error!(
                    task_id = %task_id,
                    panic = %panic_message(panic.as_ref()),
                    "Panic in background task"
                ),
            }
        });
        Some(id)
    }

    /// Tasks spawned and not yet finished
    pub fn pending(&self) -> usize {
        let mut set = self.set.lock();
        while set.try_join_next().is_some() {}
        set.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new tasks and wait for the running ones to finish.
    pub async fn close(&self) {
        let mut running = {
            let mut set = self.set.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *set)
        };
        if !running.is_empty() {
            info!(pending = running.len(), "Waiting for background tasks");
        }
        while running.join_next().await.is_some() {}
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_waits_for_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            let id = tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
            assert!(id.is_some());
        }
        assert_eq!(tasks.pending(), 3);

        tasks.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_spawn_after_close_is_rejected() {
        let tasks = BackgroundTasks::new();
        tasks.close().await;

        assert!(tasks.is_closed());
        assert!(tasks.spawn(async {}).is_none());
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        tasks.spawn(async { panic!("boom") });
        let counter = done.clone();
        tasks.spawn(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tasks.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let tasks = BackgroundTasks::new();
        let a = tasks.spawn(async {}).unwrap();
        let b = tasks.spawn(async {}).unwrap();
        assert_ne!(a, b);
        tasks.close().await;
    }
}
