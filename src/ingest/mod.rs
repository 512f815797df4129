pub mod shard;
pub mod write_buffer;

pub use shard::{ShardBuffer, WriteOperation};
pub use write_buffer::{
    BufferStats, LoadBalanceInfo, ShardStats, ShardedWriteBuffer, ShardedWriteBufferConfig,
};
