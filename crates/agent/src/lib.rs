//! # Taskforge Agent
//!
//! The reasoning loops that drive a task to completion.
//!
//! Two interchangeable loops share one [`LoopRuntime`] (backend client, tool
//! dispatch, memory, events) and one [`LoopState`] shape:
//!
//! - [`ReactAgent`] speaks the free-text Thought / Action / Observation
//!   protocol.
//! - [`FunctionCallingAgent`] uses the backend's structured tool calls.
//!
//! Both implement [`Agent`]; `run` always returns a [`RunOutcome`], never an
//! error.

pub mod dispatch;
pub mod function_calling;
pub mod react;
pub mod runtime;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

use async_trait::async_trait;
use taskforge_config::Protocol;

pub use dispatch::ToolDispatcher;
pub use function_calling::FunctionCallingAgent;
pub use react::ReactAgent;
pub use react::parser::{ParseError, ReactStep};
pub use runtime::LoopRuntime;
pub use state::{HistoryEntry, LoopState, RunOutcome, StopReason};

/// A reasoning loop.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short protocol name, as used in config ("react", "functions").
    fn protocol(&self) -> &'static str;

    /// Drive `task` to a terminal state.
    async fn run(&self, task: &str) -> RunOutcome;
}

/// The loop for `protocol`.
pub fn build_agent(protocol: Protocol, runtime: LoopRuntime) -> Box<dyn Agent> {
    match protocol {
        Protocol::React => Box::new(ReactAgent::new(runtime)),
        Protocol::Functions => Box::new(FunctionCallingAgent::new(runtime)),
    }
}
