//! Infrastructure layer: configuration, idempotency store, broker adapter,
//! external clients, and the gateway and worker pipelines built on them.

pub mod broker;
pub mod config;
pub mod external;
pub mod gateway;
pub mod idempotency;
pub mod worker;

pub use config::{ConfigError, Settings};
pub use gateway::{Gateway, GatewayResponse, GatewayStatus, Readiness};
pub use idempotency::{IdempotencyConfig, IdempotencyService, IdempotencyStore, LockAcquisition, StoreError};
pub use worker::{TaskExecutor, Worker, WorkerConfig, WorkerHandle, WorkerStats};
