//! Shared test helpers for loop tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskforge_config::AgentSettings;
use taskforge_core::error::{ProviderError, ToolError};
use taskforge_core::message::{Message, MessageToolCall};
use taskforge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use taskforge_core::tool::{ParamSpec, ParamType, Tool, ToolArgs, ToolRegistry, ToolResult, ToolStatus};
use taskforge_providers::{BackendClient, RateWindow, RetryPolicy};
use taskforge_security::ConfirmationGate;

use crate::runtime::LoopRuntime;
use crate::state::HistoryEntry;

/// A mock provider that replays scripted results and records every request.
///
/// Once the script runs out it answers with an authentication failure, which
/// the client does not retry.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::AuthenticationFailed("script exhausted".into())))
    }
}

/// Create a simple text response (no tool calls), 15 tokens.
pub fn text_response(text: &str) -> ProviderResponse {
    text_response_with_usage(text, 10, 5)
}

pub fn text_response_with_usage(text: &str, prompt: u32, completion: u32) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage::new(prompt, completion)),
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools(thought, tool_calls),
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// Echoes its `text` argument and counts executions.
pub struct CountingTool {
    name: String,
    dangerous: bool,
    calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dangerous: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::optional("text", ParamType::String, "Text to echo")]
    }

    fn is_dangerous(&self) -> bool {
        self.dangerous
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::success(format!(
            "{}: {}",
            self.name,
            args.get_str("text").unwrap_or_default()
        )))
    }
}

pub fn entry_for(action: &str) -> HistoryEntry {
    HistoryEntry {
        action: action.to_string(),
        operation: None,
        arguments: "{}".into(),
        observation: "ok".into(),
        status: Some(ToolStatus::Success),
    }
}

pub fn mock_client(provider: Arc<SequentialMockProvider>) -> BackendClient {
    BackendClient::new(
        provider,
        "mock-model",
        Arc::new(RateWindow::new(1000, Duration::from_secs(60))),
        RetryPolicy::none(),
    )
}

/// A runtime with one "echo" tool and a permissive gate.
pub fn runtime_with_echo(
    provider: Arc<SequentialMockProvider>,
    settings: AgentSettings,
) -> (LoopRuntime, Arc<AtomicUsize>) {
    let tool = CountingTool::new("echo");
    let calls = tool.calls();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(tool)).unwrap();

    let runtime = LoopRuntime::new(
        Arc::new(mock_client(provider)),
        Arc::new(registry),
        Arc::new(ConfirmationGate::permissive()),
    )
    .with_settings(settings);
    (runtime, calls)
}
