//! `parley-core`: pure building blocks of the reply pipeline.
//!
//! This crate contains **no IO**: the typed view of inbound webhook events, the
//! ingestion filter that decides whether an event becomes a task, and the retry
//! policy the worker consults after a failed attempt.

pub mod error;
pub mod filter;
pub mod id;
pub mod message;
pub mod raw_event;
pub mod retry;

pub use error::{EventError, EventResult};
pub use filter::{FilterDecision, IngestionFilter, Rejection};
pub use id::{ConversationId, CorrelationId, InboxId, TenantId};
pub use message::{MessageKind, SenderKind};
pub use raw_event::{RawEvent, RawId, RawMessageType, RawRef, RawSender};
pub use retry::{RetryDecision, RetryPolicy};
