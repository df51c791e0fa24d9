//! Time-triggered task registry
//!
//! Each registered task runs on its own tokio interval. The scheduler owns
//! the task handles; shutdown aborts them all.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Registry of periodic tasks
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named task that fires every `interval`. The first tick
    /// fires after one full interval, not immediately.
    pub fn register<F, Fut>(&self, name: &str, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        info!("Scheduling task '{}' every {:?}", name, interval);
        let task = Arc::new(task);
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Consume the immediate first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.tasks.lock().push(ScheduledTask {
            name: task_name,
            handle,
        });
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name.clone()).collect()
    }

    /// Abort every registered task
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if !task.handle.is_finished() {
                task.handle.abort();
            } else {
                warn!("Task '{}' had already stopped", task.name);
            }
        }
        info!("Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in self.tasks.lock().iter() {
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_registered_task_fires_repeatedly() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        scheduler.register("tick", Duration::from_millis(30), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.shutdown();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least 2 ticks, got {}", fired);

        // No further firing after shutdown
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_task_names() {
        let scheduler = Scheduler::new();
        scheduler.register("a", Duration::from_secs(60), || async {});
        scheduler.register("b", Duration::from_secs(60), || async {});
        assert_eq!(scheduler.task_names(), vec!["a".to_string(), "b".to_string()]);
        scheduler.shutdown();
    }
}
