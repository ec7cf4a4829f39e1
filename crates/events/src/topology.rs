use serde::{Deserialize, Serialize};

pub const DEFAULT_WORK_QUEUE: &str = "ai_tasks_queue";
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "ai_tasks_dlq";
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "ai_tasks_dlx";

/// Names of the durable queues and exchange shared by gateway and worker.
///
/// Both processes must declare these with identical names and arguments, or the
/// broker rejects the second declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTopology {
    pub work_queue: String,
    pub dead_letter_queue: String,
    pub dead_letter_exchange: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            work_queue: DEFAULT_WORK_QUEUE.to_string(),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_string(),
        }
    }
}

impl QueueTopology {
    pub fn new(
        work_queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
        dead_letter_exchange: impl Into<String>,
    ) -> Self {
        Self {
            work_queue: work_queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
            dead_letter_exchange: dead_letter_exchange.into(),
        }
    }

    /// Routing key binding the dead-letter queue to the exchange.
    pub fn dead_letter_routing_key(&self) -> &str {
        &self.dead_letter_queue
    }
}
