//! External collaborators of the worker: the processing function that
//! produces a reply and the sink that posts it.

pub mod chat_completion;
pub mod processing;
pub mod prompts;
pub mod reply_sink;

pub use chat_completion::ChatCompletionProcessor;
pub use processing::{ProcessingError, ProcessingFunction};
pub use prompts::PromptProfile;
pub use reply_sink::{ChatwootReplySink, InMemoryReplySink, ReplyError, ReplySink, SentReply};
