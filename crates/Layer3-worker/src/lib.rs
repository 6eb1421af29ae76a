//! # filepipe-worker
//!
//! Worker-side runtime: the consumer pool over the queue and the
//! periodic maintenance sweeps (requeue, retention).

pub mod maintenance;
pub mod pool;

pub use maintenance::Maintenance;
pub use pool::WorkerPool;
