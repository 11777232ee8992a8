//! Conversation orchestration: prompt assembly, memory and answer streaming.

pub mod memory;
pub mod orchestrator;
pub mod prompt;

pub use memory::ConversationMemory;
pub use orchestrator::{Conversation, Exchange, GenerationRequest, TurnStep};
pub use prompt::PromptTemplate;
