//! Autonomous browser task controller.
//!
//! A natural-language task is turned into a sequence of environment actions by
//! repeated capture → decide → act cycles, each decision coming from an LLM call.

pub mod agent;
pub mod brain;
pub mod bridge;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod page_state;
pub mod parser;
pub mod prompts;
pub mod requirement;
pub mod safety;
pub mod session;
pub mod types;

pub use agent::{Agent, AgentControl, AgentEvent, ConfirmationResolver, RunOutcome};
pub use config::{AgentConfig, ProviderConfig};
pub use error::AgentError;
pub use types::{Action, ActionKind, ConversationTurn, PageState, Role};
