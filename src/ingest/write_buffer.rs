use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Series;
use crate::storage::Storage;

use super::shard::{ShardBuffer, WriteOperation};

#[derive(Debug, Clone)]
pub struct ShardedWriteBufferConfig {
    pub num_shards: u32,
    pub buffer_size_per_shard: usize,
    pub flush_interval_ms: u64,
    pub max_flush_workers: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub load_balance_threshold: f64,
}

impl Default for ShardedWriteBufferConfig {
    fn default() -> Self {
        Self {
            num_shards: 16,
            buffer_size_per_shard: 1024,
            flush_interval_ms: 1000,
            max_flush_workers: 4,
            retry_attempts: 3,
            retry_delay_ms: 100,
            load_balance_threshold: 0.2,
        }
    }
}

/// A stable 32-bit hash of a series's canonical label string, used for
/// consistent-hash shard dispatch. FNV-1a: simple, dependency-free, and
/// stable across runs (which is all §4.I's "same series identity always
/// hashes to the same shard" requires).
fn hash_series_id(canonical_labels: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;
    let mut hash = FNV_OFFSET;
    for byte in canonical_labels.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Default)]
struct Counters {
    total_writes: AtomicU64,
    dropped_writes: AtomicU64,
    total_flushes: AtomicU64,
    failed_flushes: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct BufferStats {
    pub total_writes: u64,
    pub dropped_writes: u64,
    pub total_flushes: u64,
    pub failed_flushes: u64,
    pub per_shard_utilization: Vec<f64>,
    pub avg_utilization: f64,
    pub max_utilization: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone)]
pub struct ShardStats {
    pub shard_id: u32,
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
}

#[derive(Debug, Clone)]
pub struct LoadBalanceInfo {
    pub imbalance_ratio: f64,
    pub utilization_stddev: f64,
    pub needs_rebalancing: bool,
}

/// N shards, consistent-hash dispatch, a background flusher pool, load
/// balance stats (§4.I). Flushing runs on OS threads coordinated by a
/// `Mutex`+`Condvar`, the idiom `abiolaogu-LumaDB`'s
/// `rust-core/src/wal/group_commit.rs` uses for its batching flush thread —
/// this subsystem needs the same blocking, timeout-driven worker loop, not
/// an async runtime (§5: "the write buffer ... own their own threads").
pub struct ShardedWriteBuffer {
    storage: Arc<dyn Storage>,
    shards: Vec<Arc<ShardBuffer>>,
    config: ShardedWriteBufferConfig,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_requested: Arc<AtomicBool>,
    initialized: AtomicBool,
    start_time: Instant,
    flush_signal: Arc<(Mutex<bool>, Condvar)>,
}

impl ShardedWriteBuffer {
    pub fn new(storage: Arc<dyn Storage>, config: ShardedWriteBufferConfig) -> Self {
        let shards = (0..config.num_shards)
            .map(|id| Arc::new(ShardBuffer::new(id, config.buffer_size_per_shard)))
            .collect();
        Self {
            storage,
            shards,
            config,
            counters: Arc::new(Counters::default()),
            workers: Mutex::new(Vec::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            start_time: Instant::now(),
            flush_signal: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.max_flush_workers {
            let storage = Arc::clone(&self.storage);
            let shards = self.shards.clone();
            let config = self.config.clone();
            let counters = Arc::clone(&self.counters);
            let shutdown_requested = Arc::clone(&self.shutdown_requested);
            let flush_signal = Arc::clone(&self.flush_signal);
            let handle = thread::spawn(move || {
                flush_worker_loop(worker_id, storage, shards, config, counters, shutdown_requested, flush_signal);
            });
            workers.push(handle);
        }
    }

    fn shard_for(&self, series: &Series) -> &Arc<ShardBuffer> {
        let hash = hash_series_id(&series.labels.canonical_string());
        &self.shards[(hash % self.config.num_shards) as usize]
    }

    pub fn write(&self, series: Series) -> Result<()> {
        self.write_op(WriteOperation::new(series))
    }

    pub fn write_with_callback(
        &self,
        series: Series,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.write_op(WriteOperation::with_callback(series, callback))
    }

    fn write_op(&self, op: WriteOperation) -> Result<()> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(Error::resource("sharded write buffer is shutting down"));
        }
        let shard = self.shard_for(&op.series);
        if shard.add_write(op) {
            self.counters.total_writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters.dropped_writes.fetch_add(1, Ordering::Relaxed);
            Err(Error::resource(format!("shard {} buffer is full", shard.shard_id())))
        }
    }

    /// Synchronously drain every shard in the caller's thread.
    pub fn flush(&self, force: bool) {
        if !force {
            self.signal_flush();
            return;
        }
        for shard in &self.shards {
            flush_one_shard(shard, &self.storage, &self.config, &self.counters);
        }
    }

    /// Request an asynchronous flush of one shard via the worker signal.
    pub fn flush_shard(&self, shard_id: u32, force: bool) {
        if force {
            if let Some(shard) = self.shards.get(shard_id as usize) {
                flush_one_shard(shard, &self.storage, &self.config, &self.counters);
            }
            return;
        }
        self.signal_flush();
    }

    fn signal_flush(&self) {
        let (lock, cvar) = &*self.flush_signal;
        let mut pending = lock.lock().unwrap();
        *pending = true;
        cvar.notify_all();
    }

    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.signal_flush();
        self.flush(true);
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn get_stats(&self) -> BufferStats {
        let utilizations: Vec<f64> = self.shards.iter().map(|s| s.utilization()).collect();
        let avg = if utilizations.is_empty() { 0.0 } else { utilizations.iter().sum::<f64>() / utilizations.len() as f64 };
        let max = utilizations.iter().cloned().fold(0.0_f64, f64::max);
        let elapsed = self.start_time.elapsed().as_secs_f64().max(1e-9);
        let total_writes = self.counters.total_writes.load(Ordering::Relaxed);
        BufferStats {
            total_writes,
            dropped_writes: self.counters.dropped_writes.load(Ordering::Relaxed),
            total_flushes: self.counters.total_flushes.load(Ordering::Relaxed),
            failed_flushes: self.counters.failed_flushes.load(Ordering::Relaxed),
            per_shard_utilization: utilizations,
            avg_utilization: avg,
            max_utilization: max,
            throughput: total_writes as f64 / elapsed,
        }
    }

    pub fn get_shard_stats(&self) -> Vec<ShardStats> {
        self.shards
            .iter()
            .map(|s| ShardStats { shard_id: s.shard_id(), size: s.size(), capacity: s.capacity(), utilization: s.utilization() })
            .collect()
    }

    pub fn get_load_balance_info(&self) -> LoadBalanceInfo {
        let utilizations: Vec<f64> = self.shards.iter().map(|s| s.utilization()).collect();
        let max = utilizations.iter().cloned().fold(0.0_f64, f64::max);
        let min = utilizations.iter().cloned().fold(f64::MAX, f64::min).min(max);
        let imbalance_ratio = if max > 0.0 { (max - min) / max } else { 0.0 };
        let mean = if utilizations.is_empty() { 0.0 } else { utilizations.iter().sum::<f64>() / utilizations.len() as f64 };
        let variance = if utilizations.is_empty() {
            0.0
        } else {
            utilizations.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / utilizations.len() as f64
        };
        LoadBalanceInfo {
            imbalance_ratio,
            utilization_stddev: variance.sqrt(),
            needs_rebalancing: imbalance_ratio > self.config.load_balance_threshold,
        }
    }

    /// Healthy iff initialized, not shutting down, and no shard exceeds 90%
    /// utilization (§4.I).
    pub fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
            && !self.shutdown_requested.load(Ordering::SeqCst)
            && self.shards.iter().all(|s| s.utilization() <= 0.9)
    }
}

fn flush_one_shard(
    shard: &Arc<ShardBuffer>,
    storage: &Arc<dyn Storage>,
    config: &ShardedWriteBufferConfig,
    counters: &Counters,
) {
    let ops = shard.flush();
    if ops.is_empty() {
        return;
    }
    counters.total_flushes.fetch_add(1, Ordering::Relaxed);

    let mut failed = Vec::new();
    for mut op in ops {
        let mut succeeded = false;
        loop {
            match storage.write(&op.series) {
                Ok(()) => {
                    succeeded = true;
                    break;
                }
                Err(_) if op.retry_count < config.retry_attempts => {
                    op.retry_count += 1;
                    thread::sleep(Duration::from_millis(config.retry_delay_ms));
                }
                Err(_) => break,
            }
        }
        if succeeded {
            op.fire(Ok(()));
        } else {
            warn!(shard_id = shard.shard_id(), retries = op.retry_count, "write failed after retries, requeuing");
            // Keep retrying on the next cycle rather than dropping the write
            // (push back for a later retry cycle, per §4.I).
            counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
            failed.push(op);
        }
    }
    if !failed.is_empty() {
        shard.requeue_front(failed);
    }
}

fn flush_worker_loop(
    worker_id: u32,
    storage: Arc<dyn Storage>,
    shards: Vec<Arc<ShardBuffer>>,
    config: ShardedWriteBufferConfig,
    counters: Arc<Counters>,
    shutdown_requested: Arc<AtomicBool>,
    flush_signal: Arc<(Mutex<bool>, Condvar)>,
) {
    debug!(worker_id, "flush worker started");
    let interval = Duration::from_millis(config.flush_interval_ms);
    loop {
        {
            let (lock, cvar) = &*flush_signal;
            let guard = lock.lock().unwrap();
            let (mut guard, _timeout) = cvar.wait_timeout(guard, interval).unwrap();
            *guard = false;
        }
        if shutdown_requested.load(Ordering::SeqCst) {
            // final drain happens via the explicit shutdown() force-flush;
            // this worker just exits once told to.
            break;
        }
        // Only this worker's slice of shards, round-robin by worker_id, to
        // avoid every worker redundantly contending on every shard's mutex.
        for (i, shard) in shards.iter().enumerate() {
            if i as u32 % config.max_flush_workers.max(1) != worker_id {
                continue;
            }
            if shard.last_flush_time().elapsed() >= interval && shard.size() > 0 {
                flush_one_shard(shard, &storage, &config, &counters);
            }
        }
    }
    debug!(worker_id, "flush worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LabelSet;
    use crate::storage::MemoryStorage;

    fn series(name: &str) -> Series {
        let mut labels = LabelSet::new();
        labels.insert("__name__", name);
        Series::with_samples(labels, vec![crate::model::Sample::new(0, 1.0)])
    }

    #[test]
    fn same_series_hashes_to_same_shard_every_time() {
        let storage = Arc::new(MemoryStorage::new());
        let buffer = ShardedWriteBuffer::new(storage, ShardedWriteBufferConfig::default());
        let a = buffer.shard_for(&series("metric_a")).shard_id();
        let b = buffer.shard_for(&series("metric_a")).shard_id();
        assert_eq!(a, b);
    }

    #[test]
    fn write_then_force_flush_reaches_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let buffer = ShardedWriteBuffer::new(Arc::clone(&storage) as Arc<dyn Storage>, ShardedWriteBufferConfig {
            num_shards: 4,
            buffer_size_per_shard: 100,
            ..Default::default()
        });
        for i in 0..100 {
            buffer.write(series(&format!("metric_{i}"))).unwrap();
        }
        buffer.flush(true);
        let stats = buffer.get_stats();
        assert_eq!(stats.total_writes, 100);
        assert_eq!(stats.dropped_writes, 0);
        assert_eq!(storage.label_values("__name__").unwrap().len(), 100);
    }

    #[test]
    fn full_shard_rejects_write_and_counts_drop() {
        let storage = Arc::new(MemoryStorage::new());
        let buffer = ShardedWriteBuffer::new(storage, ShardedWriteBufferConfig { num_shards: 1, buffer_size_per_shard: 1, ..Default::default() });
        buffer.write(series("a")).unwrap();
        let err = buffer.write(series("b"));
        assert!(err.is_err());
        assert_eq!(buffer.get_stats().dropped_writes, 1);
    }

    #[test]
    fn load_balance_info_flags_imbalance() {
        let storage = Arc::new(MemoryStorage::new());
        let buffer = ShardedWriteBuffer::new(storage, ShardedWriteBufferConfig { num_shards: 2, buffer_size_per_shard: 10, ..Default::default() });
        for i in 0..5 {
            let mut labels = LabelSet::new();
            labels.insert("__name__", "same_metric");
            labels.insert("i", i.to_string());
            let _ = buffer.write(Series::with_samples(labels, vec![crate::model::Sample::new(0, 1.0)]));
        }
        let info = buffer.get_load_balance_info();
        assert!(info.imbalance_ratio >= 0.0);
    }
}
