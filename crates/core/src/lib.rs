//! # Taskforge Core
//!
//! Domain types, traits, and error definitions for the Taskforge agent core.
//! This crate has **no framework dependencies**: it defines the domain model
//! that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the reasoning loop is a trait here:
//! - [`Provider`] is the transport to an LLM backend
//! - [`Tool`] is one executable capability
//! - [`MemoryRetriever`] is the long-term memory subsystem
//!
//! Implementations live in their respective crates, so the loops can be
//! tested against scripted stand-ins.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, ProviderErrorKind, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryRetriever, RetrievedContext, RunRecord};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition, Usage};
pub use tool::{
    ParamSpec, ParamType, Tool, ToolArgs, ToolCall, ToolCategory, ToolRegistry, ToolResult,
    ToolStats, ToolStatus,
};
