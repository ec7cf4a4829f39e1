//! Broker adapters.
//!
//! The broker contract and the in-memory implementation live in
//! `parley-events`; this module holds the networked implementation.

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
