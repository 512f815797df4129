use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::task::{BackgroundTask, BackgroundTaskKind, QueuedTask};

#[derive(Debug, Clone)]
pub struct BackgroundProcessorConfig {
    pub num_workers: u32,
    pub max_queue_size: usize,
    pub task_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub worker_wait_timeout: Duration,
}

impl Default for BackgroundProcessorConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            max_queue_size: 10_000,
            task_timeout: Duration::from_millis(30_000),
            shutdown_timeout: Duration::from_millis(5_000),
            worker_wait_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timeout: AtomicU64,
    compression_tasks: AtomicU64,
    indexing_tasks: AtomicU64,
    flush_tasks: AtomicU64,
    cleanup_tasks: AtomicU64,
    max_queue_size_reached: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_rejected: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundProcessorStats {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub tasks_timeout: u64,
    pub compression_tasks: u64,
    pub indexing_tasks: u64,
    pub flush_tasks: u64,
    pub cleanup_tasks: u64,
    pub queue_size: u64,
    pub max_queue_size_reached: u64,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
}

struct Queue {
    heap: BinaryHeap<QueuedTask>,
}

/// Priority-task thread pool for compaction/indexing/flush/cleanup (§4.J).
/// Non-copyable, non-movable in spirit (it owns live worker threads); wrap it
/// in an `Arc` if shared access is needed, as `ShardedWriteBuffer`'s storage
/// handle does for its own worker pool.
pub struct BackgroundProcessor {
    config: BackgroundProcessorConfig,
    queue: Arc<(Mutex<Queue>, Condvar)>,
    counters: Arc<Counters>,
    next_task_id: Arc<AtomicU64>,
    active_tasks: Arc<AtomicU64>,
    shutdown_requested: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl BackgroundProcessor {
    pub fn new(config: BackgroundProcessorConfig) -> Self {
        Self {
            config,
            queue: Arc::new((Mutex::new(Queue { heap: BinaryHeap::new() }), Condvar::new())),
            counters: Arc::new(Counters::default()),
            next_task_id: Arc::new(AtomicU64::new(1)),
            active_tasks: Arc::new(AtomicU64::new(0)),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.num_workers {
            let queue = Arc::clone(&self.queue);
            let counters = Arc::clone(&self.counters);
            let active_tasks = Arc::clone(&self.active_tasks);
            let shutdown_requested = Arc::clone(&self.shutdown_requested);
            let wait_timeout = self.config.worker_wait_timeout;
            let task_timeout = self.config.task_timeout;
            let handle = thread::spawn(move || {
                worker_loop(worker_id, queue, counters, active_tasks, shutdown_requested, wait_timeout, task_timeout);
            });
            workers.push(handle);
        }
    }

    fn submit(&self, kind: BackgroundTaskKind, priority: u32, task_func: impl FnOnce() + Send + 'static) -> Result<u64> {
        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().unwrap();

        if queue.heap.len() >= self.config.max_queue_size {
            self.counters.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::resource("Queue is full"));
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let task = BackgroundTask::new(kind, priority, task_id, task_func);

        // Reject tasks that have already exceeded their timeout before ever
        // running — a task_timeout is measured from created_time, and a task
        // could in principle be constructed well before this check if a
        // caller pre-built and queued it elsewhere; here created_time is
        // "now", so this branch only fires for a zero or negative timeout
        // configuration, which we still honor.
        if task.created_time.elapsed() >= self.config.task_timeout {
            self.counters.tasks_timeout.fetch_add(1, Ordering::Relaxed);
            return Err(Error::timeout("task exceeded timeout before scheduling"));
        }

        queue.heap.push(QueuedTask(task));
        self.counters.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        let len = queue.heap.len() as u64;
        self.counters
            .max_queue_size_reached
            .fetch_max(len, Ordering::Relaxed);
        cvar.notify_one();
        Ok(task_id)
    }

    pub fn submit_compression(&self, task_func: impl FnOnce() + Send + 'static, priority: Option<u32>) -> Result<u64> {
        self.submit(BackgroundTaskKind::Compression, priority.unwrap_or(3), task_func)
    }

    pub fn submit_indexing(&self, task_func: impl FnOnce() + Send + 'static, priority: Option<u32>) -> Result<u64> {
        self.submit(BackgroundTaskKind::Indexing, priority.unwrap_or(2), task_func)
    }

    pub fn submit_flush(&self, task_func: impl FnOnce() + Send + 'static, priority: Option<u32>) -> Result<u64> {
        self.submit(BackgroundTaskKind::Flush, priority.unwrap_or(1), task_func)
    }

    pub fn submit_cleanup(&self, task_func: impl FnOnce() + Send + 'static, priority: Option<u32>) -> Result<u64> {
        self.submit(BackgroundTaskKind::Cleanup, priority.unwrap_or(4), task_func)
    }

    /// Block until the queue is empty and every submitted task has been
    /// processed, or `timeout` elapses. Polls at a short fixed cadence.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let queue_size = self.queue.0.lock().unwrap().heap.len() as u64;
            let processed = self.counters.tasks_processed.load(Ordering::SeqCst);
            let submitted = self.counters.tasks_submitted.load(Ordering::SeqCst);
            if queue_size == 0 && processed >= submitted {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        {
            let (lock, cvar) = &*self.queue;
            let _guard = lock.lock().unwrap();
            cvar.notify_all();
        }
        self.wait_for_completion(self.config.shutdown_timeout);
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn get_config(&self) -> &BackgroundProcessorConfig {
        &self.config
    }

    pub fn get_stats(&self) -> BackgroundProcessorStats {
        BackgroundProcessorStats {
            tasks_processed: self.counters.tasks_processed.load(Ordering::Relaxed),
            tasks_failed: self.counters.tasks_failed.load(Ordering::Relaxed),
            tasks_timeout: self.counters.tasks_timeout.load(Ordering::Relaxed),
            compression_tasks: self.counters.compression_tasks.load(Ordering::Relaxed),
            indexing_tasks: self.counters.indexing_tasks.load(Ordering::Relaxed),
            flush_tasks: self.counters.flush_tasks.load(Ordering::Relaxed),
            cleanup_tasks: self.counters.cleanup_tasks.load(Ordering::Relaxed),
            queue_size: self.queue.0.lock().unwrap().heap.len() as u64,
            max_queue_size_reached: self.counters.max_queue_size_reached.load(Ordering::Relaxed),
            tasks_submitted: self.counters.tasks_submitted.load(Ordering::Relaxed),
            tasks_rejected: self.counters.tasks_rejected.load(Ordering::Relaxed),
        }
    }
}

fn worker_loop(
    worker_id: u32,
    queue: Arc<(Mutex<Queue>, Condvar)>,
    counters: Arc<Counters>,
    active_tasks: Arc<AtomicU64>,
    shutdown_requested: Arc<AtomicBool>,
    wait_timeout: Duration,
    task_timeout: Duration,
) {
    debug!(worker_id, "background worker started");
    loop {
        let task = {
            let (lock, cvar) = &*queue;
            let mut guard = lock.lock().unwrap();
            loop {
                if let Some(QueuedTask(task)) = guard.heap.pop() {
                    break Some(task);
                }
                if shutdown_requested.load(Ordering::SeqCst) {
                    break None;
                }
                let (next_guard, _timeout) = cvar.wait_timeout(guard, wait_timeout).unwrap();
                guard = next_guard;
            }
        };

        let Some(task) = task else { break };

        active_tasks.fetch_add(1, Ordering::SeqCst);
        bump_kind_counter(&counters, task.kind);

        if task.created_time.elapsed() >= task_timeout {
            counters.tasks_timeout.fetch_add(1, Ordering::Relaxed);
        } else {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task.task_func));
            match result {
                Ok(()) => {
                    counters.tasks_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(worker_id, task_id = task.task_id, "background task panicked");
                    counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker_id, "background worker stopped");
}

fn bump_kind_counter(counters: &Counters, kind: BackgroundTaskKind) {
    match kind {
        BackgroundTaskKind::Compression => counters.compression_tasks.fetch_add(1, Ordering::Relaxed),
        BackgroundTaskKind::Indexing => counters.indexing_tasks.fetch_add(1, Ordering::Relaxed),
        BackgroundTaskKind::Flush => counters.flush_tasks.fetch_add(1, Ordering::Relaxed),
        BackgroundTaskKind::Cleanup => counters.cleanup_tasks.fetch_add(1, Ordering::Relaxed),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn single_worker_runs_in_priority_then_submission_order() {
        let processor = BackgroundProcessor::new(BackgroundProcessorConfig { num_workers: 1, ..Default::default() });
        processor.initialize();

        let (tx, rx) = mpsc::channel();
        let tx1 = tx.clone();
        let tx2 = tx.clone();
        let tx3 = tx.clone();
        processor.submit_cleanup(move || tx1.send(1).unwrap(), None).unwrap(); // priority 4
        processor.submit_flush(move || tx2.send(2).unwrap(), None).unwrap(); // priority 1
        processor.submit_compression(move || tx3.send(3).unwrap(), None).unwrap(); // priority 3

        processor.wait_for_completion(Duration::from_secs(2));
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, vec![2, 3, 1]);

        let stats = processor.get_stats();
        assert_eq!(stats.tasks_processed, 3);
        assert_eq!(stats.tasks_failed, 0);
        assert_eq!(stats.queue_size, 0);

        processor.shutdown();
    }

    #[test]
    fn queue_full_rejects_submission() {
        let processor = BackgroundProcessor::new(BackgroundProcessorConfig { num_workers: 0, max_queue_size: 1, ..Default::default() });
        processor.submit_cleanup(|| {}, None).unwrap();
        let err = processor.submit_cleanup(|| {}, None);
        assert!(err.is_err());
        assert_eq!(processor.get_stats().tasks_rejected, 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_quiescent() {
        let processor = BackgroundProcessor::new(BackgroundProcessorConfig { num_workers: 2, ..Default::default() });
        processor.initialize();
        processor.submit_flush(|| {}, None).unwrap();
        processor.shutdown();
        processor.shutdown();
        assert!(!processor.is_healthy());
    }

    #[test]
    fn panicking_task_is_caught_and_counted_as_failed() {
        let processor = BackgroundProcessor::new(BackgroundProcessorConfig { num_workers: 1, ..Default::default() });
        processor.initialize();
        processor.submit_flush(|| panic!("boom"), None).unwrap();
        processor.wait_for_completion(Duration::from_secs(2));
        assert_eq!(processor.get_stats().tasks_failed, 1);
        processor.shutdown();
    }
}
