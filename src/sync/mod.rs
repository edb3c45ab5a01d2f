//! Small synchronization primitives used off the data path.

mod latch;
mod pool;

pub use latch::StatusLatch;
pub use pool::BufferPool;
