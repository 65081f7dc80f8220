//! Conversation core for a KoboldAI Horde chatbot.
//!
//! The crate turns a rolling conversation log into a prompt, submits it to a
//! Horde text-generation job, polls for completion, and handles new input
//! arriving while a job is in flight: the active job is cancelled and a
//! continuation restarts generation against the refreshed memory once the
//! cancellation (or the job's natural completion) is acknowledged.
//!
//! The chat-platform gateway, message rewriting and privacy notices are the
//! collaborator's business; it supplies a [`ChatBotConfig`], implements
//! [`ChatEvents`] to receive replies and typing-indicator transitions, and
//! feeds inbound messages to [`ChatBot::push_message`].

pub mod chatbot;
pub mod config;
pub mod error;
pub mod events;
pub mod horde;
pub mod memory;
pub mod parser;
pub mod prompt;

pub use chatbot::ChatBot;
pub use config::ChatBotConfig;
pub use error::{ConfigError, Error, HordeError, Result};
pub use events::{ChatEvents, NullEvents};
pub use horde::{HordeClient, JobApi, JobCheck, JobStatus, SamplerSettings};
pub use memory::{MemoryEntry, MemoryStore};
pub use parser::{PLACEHOLDER_REPLY, parse_replies};
pub use prompt::build_prompt;
