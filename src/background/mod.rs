pub mod processor;
pub mod task;

pub use processor::{BackgroundProcessor, BackgroundProcessorConfig, BackgroundProcessorStats};
pub use task::{BackgroundTask, BackgroundTaskKind, QueuedTask};
