//! LLM backend access for Taskforge.
//!
//! Transports implement `taskforge_core::Provider`. The [`BackendClient`]
//! layers rate limiting, retry and token accounting on top of one.

pub mod client;
pub mod openai_compat;
pub mod rate_window;
pub mod recovery;
pub mod retry;

pub use client::{BackendClient, ChatOutput, ChatParams, TokenUsage, ToolChatOutput, UsageTotals};
pub use openai_compat::OpenAiCompatProvider;
pub use rate_window::RateWindow;
pub use recovery::recover_failed_generation;
pub use retry::{RetryPolicy, sleep_or_cancel};
