//! Agent module - the run loop and everything it leans on
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │ AgentHandler │────>│ AgentEngine │────>│ ProviderManager │
//! │  (router)    │     │             │     │   (failover)    │
//! └──────────────┘     └─────────────┘     └─────────────────┘
//!                        │    │    │
//!                        ▼    ▼    ▼
//!              ContextBuilder │  ToolRegistry
//!                             ▼
//!                      ContextCompactor
//! ```
//!
//! A run picks providers, builds the prompt, then alternates provider calls
//! and tool execution until the model answers without tool calls or the
//! iteration budget is spent. [`RunEvent`]s describe each step to any
//! registered [`RunEventSink`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clawcore::agent::{AgentEngine, AgentInput};
//! use clawcore::config::Config;
//! use clawcore::providers::ProviderManager;
//! use clawcore::tools::ToolRegistry;
//!
//! async fn run(manager: ProviderManager) {
//!     let engine = AgentEngine::new(&Config::default(), Arc::new(manager), Arc::new(ToolRegistry::new()));
//!     let out = engine.execute(AgentInput::new("cli:me", "cli", "Hello")).await;
//!     println!("{}", out.response);
//! }
//! ```

pub mod compaction;
mod context;
mod engine;
mod events;
mod handler;
mod repair;
mod tool_parts;

pub use compaction::{
    estimate_messages, estimate_tokens, CompactionOutcome, CompactionStrategy, ContextCompactor,
};
pub use context::{BootstrapFile, ContextBuilder, PromptBuilder, PromptInputs, RuntimeContext};
pub use engine::{AgentEngine, AgentInput, AgentOutput, CronContext, MAX_DENIALS_PER_TOOL};
pub use events::{RunEvent, RunEventSink, RunOutcome, TracingSink};
pub use handler::{AgentHandler, CRON_JOB_KEY, TOOL_POLICY_KEY};
pub use repair::{interrupted_result, repair_orphaned_tool_calls};
pub use tool_parts::{ToolPart, ToolPartStatus};
