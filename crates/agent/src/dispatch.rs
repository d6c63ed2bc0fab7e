//! Acting on one requested tool call.
//!
//! Both loops funnel every call through [`ToolDispatcher::dispatch`], which
//! applies loop detection, tool lookup, the confirmation gate and execution
//! in that order. Each step that stops the call still yields an observation,
//! so the loop always has something to feed back.

use chrono::Utc;
use std::sync::Arc;
use taskforge_core::error::ToolError;
use taskforge_core::event::{DomainEvent, EventBus};
use taskforge_core::tool::{ToolArgs, ToolRegistry, ToolResult, ToolStatus};
use taskforge_security::{ConfirmationGate, GateDecision};
use tracing::{debug, info, warn};

use crate::state::{HistoryEntry, LoopState, REPEAT_WINDOW};

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<ConfirmationGate>,
    event_bus: Arc<EventBus>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ConfirmationGate>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            gate,
            event_bus,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    /// Run `name` with `args` unless something upstream stops it.
    ///
    /// `args` is the already-parsed argument object; a parse failure is
    /// reported back as an observation once the tool is known to exist.
    pub async fn dispatch(
        &self,
        state: &LoopState,
        name: &str,
        args: Result<ToolArgs, ToolError>,
    ) -> HistoryEntry {
        let arguments = match &args {
            Ok(parsed) => parsed.to_value().to_string(),
            Err(_) => "{}".to_string(),
        };
        let entry = |operation: Option<String>, observation: String, status: Option<ToolStatus>| HistoryEntry {
            action: name.to_string(),
            operation,
            arguments: arguments.clone(),
            observation,
            status,
        };

        if state.is_repeating(name, &arguments) {
            warn!(tool = %name, "Repeated action skipped");
            return entry(None, repeat_observation(name), None);
        }

        let tool = match self.registry.get(name) {
            Ok(tool) => tool,
            Err(_) => {
                warn!(tool = %name, "Unknown tool requested");
                return entry(None, self.not_found_observation(name), None);
            }
        };

        let args = match args {
            Ok(args) => args,
            Err(e) => {
                debug!(tool = %name, error = %e, "Unparseable tool arguments");
                return entry(None, format!("Error: {e}"), None);
            }
        };
        let operation = tool.operation(&args);

        let decision = self.gate.check(tool, &args).await;
        self.event_bus.publish(DomainEvent::ConfirmationResolved {
            tool_name: name.to_string(),
            operation: operation.clone(),
            approved: decision.is_proceed(),
            timestamp: Utc::now(),
        });

        let result = match decision {
            GateDecision::Proceed => match self.registry.execute(name, &args).await {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            },
            GateDecision::Blocked { reason } => ToolResult::cancelled(reason),
        };

        info!(
            tool = %name,
            operation = %operation,
            status = status_label(result.status),
            duration_ms = result.duration.as_millis() as u64,
            "Tool call finished"
        );
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            status: status_label(result.status).to_string(),
            duration_ms: result.duration.as_millis() as u64,
            timestamp: Utc::now(),
        });

        entry(Some(operation), result.to_observation(), Some(result.status))
    }

    fn not_found_observation(&self, name: &str) -> String {
        format!(
            "Error: tool '{name}' not found. Available tools: {}",
            self.registry.names().join(", ")
        )
    }
}

fn repeat_observation(name: &str) -> String {
    format!(
        "Skipped: '{name}' was already called twice with these arguments in the last {REPEAT_WINDOW} steps. \
         Use the observations you already have, try a different approach, or give your final answer."
    )
}

pub(crate) fn status_label(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Success => "success",
        ToolStatus::Error => "error",
        ToolStatus::Partial => "partial",
        ToolStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountingTool, entry_for};
    use taskforge_config::ConfirmationMode;
    use taskforge_security::{ConfirmationGate, ScriptedPrompt};

    fn dispatcher(tool: CountingTool, gate: ConfirmationGate) -> (ToolDispatcher, Arc<EventBus>) {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(tool)).unwrap();
        let bus = Arc::new(EventBus::default());
        (ToolDispatcher::new(Arc::new(registry), Arc::new(gate), bus.clone()), bus)
    }

    #[tokio::test]
    async fn executes_and_reports_observation() {
        let tool = CountingTool::new("echo");
        let calls = tool.calls();
        let (dispatcher, _) = dispatcher(tool, ConfirmationGate::permissive());
        let state = LoopState::new(5, 1000);

        let entry = dispatcher
            .dispatch(&state, "echo", Ok(ToolArgs::new().with("text", "hi")))
            .await;
        assert_eq!(entry.observation, "echo: hi");
        assert_eq!(entry.status, Some(ToolStatus::Success));
        assert_eq!(entry.label(), "echo(echo)");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_tools() {
        let (dispatcher, _) = dispatcher(CountingTool::new("echo"), ConfirmationGate::permissive());
        let state = LoopState::new(5, 1000);

        let entry = dispatcher.dispatch(&state, "weather", Ok(ToolArgs::new())).await;
        assert_eq!(entry.observation, "Error: tool 'weather' not found. Available tools: echo");
        assert!(entry.status.is_none());
    }

    #[tokio::test]
    async fn repeated_action_is_not_executed() {
        let tool = CountingTool::new("echo");
        let calls = tool.calls();
        let (dispatcher, _) = dispatcher(tool, ConfirmationGate::permissive());
        let mut state = LoopState::new(5, 1000);
        let mut seen = entry_for("echo");
        seen.arguments = ToolArgs::new().with("text", "x").to_value().to_string();
        state.record(seen.clone());
        state.record(seen);

        let first = dispatcher.dispatch(&state, "echo", Ok(ToolArgs::new().with("text", "x"))).await;
        let second = dispatcher.dispatch(&state, "echo", Ok(ToolArgs::new().with("text", "x"))).await;
        assert!(first.observation.starts_with("Skipped:"));
        assert_eq!(first.observation, second.observation);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_arguments_become_observation() {
        let (dispatcher, _) = dispatcher(CountingTool::new("echo"), ConfirmationGate::permissive());
        let state = LoopState::new(5, 1000);
        let args = ToolArgs::from_json_str("not json");

        let entry = dispatcher.dispatch(&state, "echo", args).await;
        assert!(entry.observation.starts_with("Error:"));
        assert!(entry.status.is_none());
    }

    #[tokio::test]
    async fn declined_call_is_cancelled_and_published() {
        let tool = CountingTool::new("echo").dangerous();
        let calls = tool.calls();
        let prompt = Arc::new(ScriptedPrompt::new(vec![Some(false)]));
        let gate = ConfirmationGate::new(ConfirmationMode::Auto, prompt.clone());
        let (dispatcher, bus) = dispatcher(tool, gate);
        let mut events = bus.subscribe();
        let state = LoopState::new(5, 1000);

        let entry = dispatcher.dispatch(&state, "echo", Ok(ToolArgs::new().with("text", "x"))).await;
        assert_eq!(entry.status, Some(ToolStatus::Cancelled));
        assert!(entry.observation.contains("cancelled by user"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(prompt.requests().len(), 1);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ConfirmationResolved { approved: false, .. }
        ));
    }
}
