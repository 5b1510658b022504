//! Conversation types
//!
//! `Message`, `Role` and `ToolCall` are the history format shared by the
//! agent engine, the compactor and every provider backend.

mod types;

pub use types::{Message, MessageMetadata, Role, ToolCall};
