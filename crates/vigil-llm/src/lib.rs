pub mod openai;
pub mod reliable;

pub mod mock;

pub use mock::ScriptedReasoner;
pub use openai::{OpenAiConfig, OpenAiReasoner};
pub use reliable::{ReliableConfig, ReliableReasoner};
