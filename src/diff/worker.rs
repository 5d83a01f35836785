//! Fixed-width worker pool draining a shared task queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::error;

#[derive(Debug, Default)]
struct Gauge {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Runs a closure over every queued item with at most `workers` items in
/// flight. Results come back in completion order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    workers: usize,
    gauge: Arc<Gauge>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            gauge: Arc::new(Gauge::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queued(&self) -> usize {
        self.gauge.queued.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of items that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::Acquire)
    }

    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let worker_count = self.workers.min(items.len());
        self.gauge.queued.fetch_add(items.len(), Ordering::AcqRel);
        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let task = Arc::new(task);

        let mut set = JoinSet::new();
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let task = Arc::clone(&task);
            let gauge = Arc::clone(&self.gauge);
            set.spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some(item) = next else {
                        break;
                    };
                    gauge.queued.fetch_sub(1, Ordering::AcqRel);
                    let now = gauge.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    gauge.peak.fetch_max(now, Ordering::AcqRel);
                    let result = task(item).await;
                    gauge.in_flight.fetch_sub(1, Ordering::AcqRel);
                    results.push(result);
                }
                results
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(mut results) => out.append(&mut results),
                Err(err) => error!(pool = %self.name, error = %err, "worker stopped unexpectedly"),
            }
        }
        out
    }
}
