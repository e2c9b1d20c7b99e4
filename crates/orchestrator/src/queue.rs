//! Serialized task queue.
//!
//! Tasks submitted under the same key run one at a time, in submission
//! order. Each key gets a worker with its own channel, created on first
//! submit and retired once it has been idle for
//! [`QueueConfig::idle_timeout`]. A task releases its key by calling
//! [`TaskChain::next`]; dropping the chain (or panicking) releases it too.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// Default idle time before a key's worker is retired.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub idle_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Completion handle handed to every queued task.
///
/// The next task for the same key starts once this is consumed by
/// [`next`](Self::next) or dropped.
#[derive(Debug)]
pub struct TaskChain {
    key: String,
    name: String,
    done: Option<oneshot::Sender<()>>,
}

impl TaskChain {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals that the task is finished and releases the key.
    pub fn next(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl Drop for TaskChain {
    fn drop(&mut self) {
        if self.done.is_some() {
            tracing::warn!(
                key = %self.key,
                task = %self.name,
                "task chain dropped without calling next, releasing queue"
            );
        }
    }
}

struct QueuedTask {
    name: String,
    run: Box<dyn FnOnce(TaskChain) -> BoxFuture<'static, ()> + Send>,
}

struct Inner {
    chains: Mutex<HashMap<String, mpsc::UnboundedSender<QueuedTask>>>,
    config: QueueConfig,
}

impl Inner {
    fn chains(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<QueuedTask>>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs tasks one at a time per key.
#[derive(Clone)]
pub struct SerializedTaskQueue {
    inner: Arc<Inner>,
}

impl Default for SerializedTaskQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl SerializedTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                chains: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Queues `task` behind every task already submitted under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, key: impl Into<String>, name: impl Into<String>, task: F)
    where
        F: FnOnce(TaskChain) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let name = name.into();
        tracing::debug!(%key, task = %name, "task submitted");
        metrics::counter!("task_queue_submitted_total").increment(1);

        let task = QueuedTask {
            name,
            run: Box::new(move |chain| Box::pin(task(chain))),
        };

        let mut chains = self.inner.chains();
        let task = match chains.get(&key) {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                // The worker is gone without retiring itself; start over.
                Err(mpsc::error::SendError(task)) => task,
            },
            None => task,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(task);
        chains.insert(key.clone(), sender);
        metrics::gauge!("task_queue_chains").set(chains.len() as f64);
        drop(chains);

        tokio::spawn(run_worker(self.inner.clone(), key, receiver));
    }

    /// Returns the number of keys that currently have a worker.
    pub fn active_chains(&self) -> usize {
        self.inner.chains().len()
    }
}

async fn run_worker(inner: Arc<Inner>, key: String, mut receiver: mpsc::UnboundedReceiver<QueuedTask>) {
    tracing::debug!(%key, "task chain worker started");

    loop {
        let task = match timeout(inner.config.idle_timeout, receiver.recv()).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(_) => match retire_if_idle(&inner, &key, &mut receiver) {
                Some(task) => task,
                None => break,
            },
        };
        run_task(&key, task).await;
    }

    tracing::debug!(%key, "task chain worker stopped");
}

/// Removes the worker's entry unless a task slipped in. Holding the map lock
/// while checking the channel means a submit either lands before the check
/// or finds no entry and starts a new worker.
fn retire_if_idle(
    inner: &Inner,
    key: &str,
    receiver: &mut mpsc::UnboundedReceiver<QueuedTask>,
) -> Option<QueuedTask> {
    let mut chains = inner.chains();
    match receiver.try_recv() {
        Ok(task) => Some(task),
        Err(_) => {
            chains.remove(key);
            metrics::gauge!("task_queue_chains").set(chains.len() as f64);
            tracing::debug!(%key, "idle task chain retired");
            None
        }
    }
}

async fn run_task(key: &str, task: QueuedTask) {
    let QueuedTask { name, run } = task;
    let (done, released) = oneshot::channel();
    let chain = TaskChain {
        key: key.to_string(),
        name: name.clone(),
        done: Some(done),
    };

    let key_owned = key.to_string();
    tokio::spawn(async move {
        if AssertUnwindSafe(run(chain)).catch_unwind().await.is_err() {
            tracing::error!(key = %key_owned, task = %name, "queued task panicked");
        }
    });

    // Err means the chain was dropped, which releases the key as well.
    let _ = released.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_same_key_runs_in_submission_order() {
        let queue = SerializedTaskQueue::default();
        let entries = log();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..10 {
            let entries = entries.clone();
            let tx = tx.clone();
            queue.submit("lb-1", format!("task-{i}"), move |chain| async move {
                // Later tasks sleep less; order must still hold.
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                entries.lock().unwrap().push(format!("task-{i}"));
                chain.next();
                let _ = tx.send(());
            });
        }

        for _ in 0..10 {
            rx.recv().await.unwrap();
        }
        let expected: Vec<_> = (0..10).map(|i| format!("task-{i}")).collect();
        assert_eq!(*entries.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_same_key_never_overlaps() {
        let queue = SerializedTaskQueue::default();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..20 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            let tx = tx.clone();
            queue.submit("lb-1", format!("task-{i}"), move |chain| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
                chain.next();
                let _ = tx.send(());
            });
        }

        for _ in 0..20 {
            rx.recv().await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let queue = SerializedTaskQueue::default();
        let gate = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        // The first key blocks until the second key's task has run.
        {
            let gate = gate.clone();
            let tx = tx.clone();
            queue.submit("lb-1", "blocked", move |chain| async move {
                gate.notified().await;
                let _ = tx.send("lb-1");
                chain.next();
            });
        }
        {
            let gate = gate.clone();
            let tx = tx.clone();
            queue.submit("lb-2", "free", move |chain| async move {
                let _ = tx.send("lb-2");
                gate.notify_one();
                chain.next();
            });
        }

        assert_eq!(rx.recv().await, Some("lb-2"));
        assert_eq!(rx.recv().await, Some("lb-1"));
        assert_eq!(queue.active_chains(), 2);
    }

    #[tokio::test]
    async fn test_completion_waits_for_next_not_return() {
        let queue = SerializedTaskQueue::default();
        let entries = log();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let entries = entries.clone();
            queue.submit("lb-1", "async-finish", move |chain| async move {
                entries.lock().unwrap().push("first started".to_string());
                // Hand the chain to another task; returning does not release.
                tokio::spawn(async move {
                    let _ = release_rx.await;
                    entries.lock().unwrap().push("first done".to_string());
                    chain.next();
                });
            });
        }
        {
            let entries = entries.clone();
            queue.submit("lb-1", "second", move |chain| async move {
                entries.lock().unwrap().push("second".to_string());
                chain.next();
                let _ = tx.send(());
            });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*entries.lock().unwrap(), vec!["first started"]);

        release_tx.send(()).unwrap();
        rx.recv().await.unwrap();
        assert_eq!(
            *entries.lock().unwrap(),
            vec!["first started", "first done", "second"]
        );
    }

    #[tokio::test]
    async fn test_panicking_task_releases_queue() {
        let queue = SerializedTaskQueue::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.submit("lb-1", "panics", |chain| async move {
            let _held = chain;
            panic!("boom");
        });
        queue.submit("lb-1", "dropped", |chain| async move {
            drop(chain);
        });
        queue.submit("lb-1", "after", move |chain| async move {
            let _ = tx.send("after");
            chain.next();
        });

        assert_eq!(rx.recv().await, Some("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_is_retired_and_recreated() {
        let queue = SerializedTaskQueue::new(QueueConfig {
            idle_timeout: Duration::from_secs(5),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let submit = |label: &'static str| {
            let tx = tx.clone();
            queue.submit("lb-1", label, move |chain| async move {
                let _ = tx.send(label);
                chain.next();
            });
        };

        submit("first");
        assert_eq!(rx.recv().await, Some("first"));
        assert_eq!(queue.active_chains(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.active_chains(), 0);

        submit("second");
        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(queue.active_chains(), 1);
    }
}
