//! Bounded fan-out and per-key ordered execution.
//!
//! Two primitives cover every concurrency need of the jobs:
//!
//! - [`WorkerPool`]: submit any number of futures, at most `limit` run at a
//!   time, [`WorkerPool::wait`] drains them and returns the first error.
//! - [`KeyedQueue`]: items that share a key are handled by the same consumer
//!   in submission order, items with different keys run in parallel. The
//!   incremental apply path relies on this for per-table SCN ordering.

use anyhow::{anyhow, Result};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Bounded-concurrency task pool with first-error propagation.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<()>>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Submit a task. The task starts running as soon as a permit frees up;
    /// submission itself never blocks.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("worker pool closed: {e}"))?;
            fut.await
        });
    }

    /// Wait for every submitted task. The first error wins; later errors are
    /// logged and dropped.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(r) => r,
                Err(e) => Err(anyhow!("worker task panicked: {e}")),
            };
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    tracing::warn!("additional worker error after first failure: {e:#}");
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fan-out queue that preserves per-key ordering.
///
/// Each of the `workers` consumers owns a private channel; a key always
/// hashes to the same channel, so two items with the same key can never be
/// in flight concurrently or get reordered. A consumer that returns an error
/// stops; later `add` calls routed to it surface that failure.
pub struct KeyedQueue<T> {
    senders: Vec<mpsc::Sender<T>>,
    workers: JoinSet<Result<()>>,
}

impl<T: Send + 'static> KeyedQueue<T> {
    pub fn new<F, Fut>(workers: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let n = workers.max(1);
        let mut senders = Vec::with_capacity(n);
        let mut set = JoinSet::new();
        for _ in 0..n {
            let (tx, mut rx) = mpsc::channel::<T>(1024);
            senders.push(tx);
            let handler = handler.clone();
            set.spawn(async move {
                while let Some(item) = rx.recv().await {
                    handler(item).await?;
                }
                Ok(())
            });
        }
        Self {
            senders,
            workers: set,
        }
    }

    /// Enqueue an item under `key`. Blocks when the owning consumer's
    /// channel is full; fails when that consumer already died on an error.
    pub async fn add(&self, key: &str, item: T) -> Result<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.senders.len();
        self.senders[idx]
            .send(item)
            .await
            .map_err(|_| anyhow!("ordered queue consumer for key [{key}] has stopped"))
    }

    /// Close the queue and wait for the consumers to drain. Returns the
    /// first consumer error.
    pub async fn close(mut self) -> Result<()> {
        self.senders.clear();
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(joined) = self.workers.join_next().await {
            let result = match joined {
                Ok(r) => r,
                Err(e) => Err(anyhow!("queue consumer panicked: {e}")),
            };
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    tracing::warn!("additional queue consumer error: {e:#}");
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn pool_runs_everything_and_respects_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let mut pool = WorkerPool::new(3);
        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        pool.wait().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn pool_surfaces_first_error() {
        let mut pool = WorkerPool::new(2);
        pool.spawn(async { Ok(()) });
        pool.spawn(async { Err(anyhow!("boom")) });
        pool.spawn(async { Ok(()) });
        let err = pool.wait().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn keyed_queue_preserves_per_key_order() {
        let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = KeyedQueue::new(4, move |(key, scn): (String, u64)| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((key, scn));
                Ok(())
            }
        });

        for scn in 1..=50u64 {
            queue.add("ORDERS", ("ORDERS".to_string(), scn)).await.unwrap();
            queue.add("ITEMS", ("ITEMS".to_string(), scn)).await.unwrap();
        }
        queue.close().await.unwrap();

        let seen = seen.lock().unwrap();
        for table in ["ORDERS", "ITEMS"] {
            let scns: Vec<u64> = seen
                .iter()
                .filter(|(k, _)| k == table)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(scns, (1..=50).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn keyed_queue_reports_consumer_error() {
        let queue = KeyedQueue::new(1, |n: u64| async move {
            if n == 3 {
                Err(anyhow!("apply failed at {n}"))
            } else {
                Ok(())
            }
        });
        for n in 1..=3u64 {
            queue.add("T", n).await.unwrap();
        }
        let err = queue.close().await.unwrap_err();
        assert!(err.to_string().contains("apply failed"));
    }
}
