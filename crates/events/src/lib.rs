//! Task contract and broker mechanics shared by the gateway and the worker.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod topology;

pub use bus::{BrokerError, Delivery, TaskBroker, TaskConsumer};
pub use envelope::{AgentConfig, EnvelopeError, ResponseMode, Sender, TaskEnvelope};
pub use in_memory_bus::{InMemoryBroker, QueuedMessage};
pub use topology::QueueTopology;
