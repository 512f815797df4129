use std::cmp::Ordering;
use std::time::Instant;

/// What kind of maintenance work a [`super::processor::BackgroundProcessor`]
/// task performs. Used only to bump per-kind stats counters; the closure
/// itself carries the actual work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTaskKind {
    Compression,
    Indexing,
    Flush,
    Cleanup,
}

/// A unit of background work: a closure, its submission metadata, and a
/// priority (lower number = more urgent). Ordered by `(priority asc, task_id
/// asc)` so the binary heap used as the processor's priority queue pops the
/// most urgent, earliest-submitted task first.
pub struct BackgroundTask {
    pub kind: BackgroundTaskKind,
    pub task_func: Box<dyn FnOnce() + Send>,
    pub created_time: Instant,
    pub priority: u32,
    pub task_id: u64,
}

impl BackgroundTask {
    pub fn new(
        kind: BackgroundTaskKind,
        priority: u32,
        task_id: u64,
        task_func: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { kind, task_func: Box::new(task_func), created_time: Instant::now(), priority, task_id }
    }
}

/// Wraps a [`BackgroundTask`] so `BinaryHeap` (a max-heap) pops the
/// *smallest* `(priority, task_id)` pair first — `Reverse` flips the
/// ordering, and the task_id tie-break preserves submission order at equal
/// priority.
pub struct QueuedTask(pub BackgroundTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.task_id == other.0.task_id
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (max-heap) yields lowest priority number,
        // then lowest task_id, first.
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.task_id.cmp(&self.0.task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn heap_pops_lowest_priority_then_lowest_task_id() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedTask(BackgroundTask::new(BackgroundTaskKind::Cleanup, 4, 1, || {})));
        heap.push(QueuedTask(BackgroundTask::new(BackgroundTaskKind::Flush, 1, 2, || {})));
        heap.push(QueuedTask(BackgroundTask::new(BackgroundTaskKind::Compression, 3, 3, || {})));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.0.task_id)).collect();
        assert_eq!(order, vec![2, 3, 1]); // priorities 1,3,4
    }

    #[test]
    fn ties_break_by_submission_order() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedTask(BackgroundTask::new(BackgroundTaskKind::Flush, 2, 5, || {})));
        heap.push(QueuedTask(BackgroundTask::new(BackgroundTaskKind::Flush, 2, 2, || {})));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.0.task_id)).collect();
        assert_eq!(order, vec![2, 5]);
    }
}
