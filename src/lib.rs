//! ClawCore - execution core for LLM agent runtimes
//!
//! Provider failover, tool calling, context compaction and per-channel
//! message routing. Platform adapters and tool implementations plug in from
//! outside through [`channels::ChannelAdapter`] and [`tools::Tool`].

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod providers;
pub mod router;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{AgentEngine, AgentHandler, AgentInput, AgentOutput, RunOutcome};
pub use config::Config;
pub use error::{ClawError, ProviderError, Result};
pub use providers::{LLMProvider, LLMResponse, LLMToolCall, ProviderManager, ToolDefinition, Usage};
pub use router::{InboundMessage, MessageRouter, OutboundMessage};
pub use session::{Message, Role, ToolCall};
