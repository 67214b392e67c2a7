//! Deferred job scheduling.
//!
//! Finalization work runs after the session lock is released, on a
//! scheduler supplied by the host.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// A deferred job.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs a job once after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run after `delay`.
    fn schedule_once(&self, delay: Duration, task: Task);
}

/// Scheduler backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Create a scheduler spawning onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler for the runtime of the calling context, if any.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
    }
}

/// Scheduler that queues jobs until they are run explicitly.
///
/// Delays are recorded but not waited on.
#[derive(Default)]
pub struct QueueScheduler {
    queue: Mutex<Vec<Task>>,
    delays: Mutex<Vec<Duration>>,
}

impl QueueScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued jobs, including jobs scheduled while running, until the
    /// queue is empty. Returns the number of jobs run.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.queue.lock());
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if no job is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Delays of every job scheduled so far, in order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Scheduler for QueueScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) {
        debug!(delay_ms = delay.as_millis() as u64, "job queued");
        self.delays.lock().push(delay);
        self.queue.lock().push(task);
    }
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("pending", &self.len())
            .field("delays", &*self.delays.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_queue_scheduler_runs_nested_jobs() {
        let scheduler = Arc::new(QueueScheduler::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::clone(&scheduler);
        let inner_counter = Arc::clone(&counter);
        scheduler.schedule_once(
            Duration::ZERO,
            Box::pin(async move {
                inner_counter.fetch_add(1, Ordering::SeqCst);
                let nested = Arc::clone(&inner_counter);
                inner_scheduler.schedule_once(
                    Duration::from_millis(1000),
                    Box::pin(async move {
                        nested.fetch_add(10, Ordering::SeqCst);
                    }),
                );
            }),
        );

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert!(scheduler.is_empty());
        assert_eq!(
            scheduler.scheduled_delays(),
            vec![Duration::ZERO, Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn test_tokio_scheduler() {
        let scheduler = TokioScheduler::try_current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule_once(
            Duration::from_millis(5),
            Box::pin(async move {
                let _ = tx.send(42);
            }),
        );
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_no_runtime() {
        assert!(TokioScheduler::try_current().is_none());
    }
}
