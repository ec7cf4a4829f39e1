//! Task worker: consumes envelopes, runs the processing function, posts the
//! reply and settles each delivery through the retry policy.

pub mod consumer;
pub mod executor;

pub use consumer::{Worker, WorkerConfig, WorkerHandle};
pub use executor::{DeliveryOutcome, ExecutorConfig, TaskExecutor, WorkerStats};
