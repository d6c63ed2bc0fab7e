//! Security policies for Taskforge: sandbox path validation and the
//! confirmation gate.

pub mod confirm;
pub mod path;

pub use confirm::{
    ConfirmationGate, ConfirmationPrompt, ConfirmationRequest, DenyPrompt, GateDecision, LinePrompt,
    Risk, ScriptedPrompt, StdinPrompt,
};
pub use path::{PathValidationError, Sandbox, validate_path};
