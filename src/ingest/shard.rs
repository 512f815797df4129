use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Result;
use crate::model::Series;

/// A pending write plus its retry state and optional completion callback,
/// fired exactly once (§3 "write operation", P6).
pub struct WriteOperation {
    pub series: Series,
    pub queued_time: Instant,
    pub retry_count: u32,
    pub callback: Option<Box<dyn FnOnce(Result<()>) + Send>>,
}

impl WriteOperation {
    pub fn new(series: Series) -> Self {
        Self { series, queued_time: Instant::now(), retry_count: 0, callback: None }
    }

    pub fn with_callback(series: Series, callback: impl FnOnce(Result<()>) + Send + 'static) -> Self {
        Self { series, queued_time: Instant::now(), retry_count: 0, callback: Some(Box::new(callback)) }
    }

    pub fn fire(self, result: Result<()>) {
        if let Some(cb) = self.callback {
            cb(result);
        }
    }
}

struct ShardBufferState {
    queue: VecDeque<WriteOperation>,
    last_flush_time: Instant,
}

/// A bounded FIFO of pending write operations for a single shard. Mutex
/// protected; identified by `shard_id` (§4.H).
pub struct ShardBuffer {
    shard_id: u32,
    capacity: usize,
    state: Mutex<ShardBufferState>,
}

impl ShardBuffer {
    pub fn new(shard_id: u32, capacity: usize) -> Self {
        Self {
            shard_id,
            capacity,
            state: Mutex::new(ShardBufferState { queue: VecDeque::new(), last_flush_time: Instant::now() }),
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a write. Returns `false` (without enqueuing) if the buffer is
    /// full.
    pub fn add_write(&self, op: WriteOperation) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.queue.len() >= self.capacity {
            return false;
        }
        state.queue.push_back(op);
        true
    }

    /// Atomically drain and return every queued operation, resetting
    /// `last_flush_time`.
    pub fn flush(&self) -> Vec<WriteOperation> {
        let mut state = self.state.lock().unwrap();
        state.last_flush_time = Instant::now();
        state.queue.drain(..).collect()
    }

    /// Re-queue operations at the front, for a later retry cycle, without
    /// disturbing `last_flush_time` (a failed flush shouldn't look like a
    /// fresh one).
    pub fn requeue_front(&self, ops: Vec<WriteOperation>) {
        let mut state = self.state.lock().unwrap();
        for op in ops.into_iter().rev() {
            state.queue.push_front(op);
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity as f64
    }

    pub fn last_flush_time(&self) -> Instant {
        self.state.lock().unwrap().last_flush_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LabelSet;

    fn series() -> Series {
        Series::new(LabelSet::new())
    }

    #[test]
    fn add_write_respects_capacity() {
        let shard = ShardBuffer::new(0, 2);
        assert!(shard.add_write(WriteOperation::new(series())));
        assert!(shard.add_write(WriteOperation::new(series())));
        assert!(!shard.add_write(WriteOperation::new(series())));
        assert!(shard.is_full());
    }

    #[test]
    fn flush_drains_atomically() {
        let shard = ShardBuffer::new(0, 10);
        shard.add_write(WriteOperation::new(series()));
        shard.add_write(WriteOperation::new(series()));
        let drained = shard.flush();
        assert_eq!(drained.len(), 2);
        assert_eq!(shard.size(), 0);
    }

    #[test]
    fn utilization_reflects_fill_ratio() {
        let shard = ShardBuffer::new(0, 4);
        shard.add_write(WriteOperation::new(series()));
        assert_eq!(shard.utilization(), 0.25);
    }
}
