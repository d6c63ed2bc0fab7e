//! The resilient backend client.
//!
//! `BackendClient` wraps a transport with three concerns the reasoning loops
//! rely on: admission through the shared [`RateWindow`], exponential backoff
//! on transient faults, and cumulative token accounting.

use crate::rate_window::RateWindow;
use crate::recovery::recover_failed_generation;
use crate::retry::RetryPolicy;
use crate::OpenAiCompatProvider;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskforge_config::{AppConfig, BackendConfig};
use taskforge_core::error::ProviderError;
use taskforge_core::message::{Message, MessageToolCall};
use taskforge_core::provider::{
    Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition, Usage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    pub stop: Vec<String>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

impl ChatParams {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            tool_choice: None,
            parallel_tool_calls: None,
            stop: Vec::new(),
        }
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = Some(parallel);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Result of a plain text call.
#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// Result of a call that offered tools.
#[derive(Debug, Clone)]
pub struct ToolChatOutput {
    pub text: Option<String>,
    pub tool_calls: Option<Vec<MessageToolCall>>,
    pub usage: Usage,
    pub finish_reason: Option<String>,
    /// The text came from a failed tool invocation rather than a normal turn
    pub recovered: bool,
}

impl ToolChatOutput {
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Snapshot of the cumulative token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Lock-free running totals.
#[derive(Debug, Default)]
pub struct UsageTotals {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
}

impl UsageTotals {
    pub fn add(&self, usage: &Usage) {
        self.prompt_tokens.fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.completion_tokens.fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.calls.store(0, Ordering::Relaxed);
    }
}

/// Rate-limited, retrying, token-counting client over a [`Provider`].
pub struct BackendClient {
    provider: Arc<dyn Provider>,
    model: String,
    rate_window: Arc<RateWindow>,
    retry: RetryPolicy,
    usage: UsageTotals,
    cancel: CancellationToken,
}

impl BackendClient {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        rate_window: Arc<RateWindow>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            rate_window,
            retry,
            usage: UsageTotals::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// An OpenAI-compatible client built from config.
    pub fn from_config(config: &AppConfig, rate_window: Arc<RateWindow>) -> Result<Self, ProviderError> {
        let provider = OpenAiCompatProvider::from_config(config)?;
        Ok(Self::new(
            Arc::new(provider),
            config.backend.model.clone(),
            rate_window,
            RetryPolicy::from_config(&config.retry),
        ))
    }

    /// Use `token` to abort backoff waits and in-flight requests.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn rate_window(&self) -> &Arc<RateWindow> {
        &self.rate_window
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Cumulative usage since construction or the last reset.
    pub fn usage(&self) -> TokenUsage {
        self.usage.snapshot()
    }

    pub fn reset_usage(&self) {
        self.usage.reset();
    }

    /// A plain text completion.
    pub async fn chat(&self, messages: &[Message], params: &ChatParams) -> Result<ChatOutput, ProviderError> {
        let request = self.build_request(messages, &[], params)?;

        match self.send(request).await {
            Ok(response) => Ok(ChatOutput {
                text: response.message.content,
                usage: response.usage.unwrap_or_default(),
                finish_reason: response.finish_reason,
            }),
            Err(ProviderError::ToolUseFailed { body }) => match recover_failed_generation(&body) {
                Some(text) => Ok(ChatOutput {
                    text,
                    usage: Usage::default(),
                    finish_reason: Some("tool_use_failed".into()),
                }),
                None => Err(ProviderError::ToolUseFailed { body }),
            },
            Err(e) => Err(e),
        }
    }

    /// A completion that may answer with tool calls.
    pub async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &ChatParams,
    ) -> Result<ToolChatOutput, ProviderError> {
        let request = self.build_request(messages, tools, params)?;

        match self.send(request).await {
            Ok(response) => {
                let text = Some(response.message.content).filter(|t| !t.trim().is_empty());
                let tool_calls = Some(response.message.tool_calls).filter(|c| !c.is_empty());
                Ok(ToolChatOutput {
                    text,
                    tool_calls,
                    usage: response.usage.unwrap_or_default(),
                    finish_reason: response.finish_reason,
                    recovered: false,
                })
            }
            Err(ProviderError::ToolUseFailed { body }) => match recover_failed_generation(&body) {
                Some(text) => {
                    info!("Recovered text from failed tool invocation");
                    Ok(ToolChatOutput {
                        text: Some(text),
                        tool_calls: None,
                        usage: Usage::default(),
                        finish_reason: Some("tool_use_failed".into()),
                        recovered: true,
                    })
                }
                None => Err(ProviderError::ToolUseFailed { body }),
            },
            Err(e) => Err(e),
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &ChatParams,
    ) -> Result<ProviderRequest, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidRequest("messages must not be empty".into()));
        }
        if params.max_tokens == 0 {
            return Err(ProviderError::InvalidRequest("max_tokens must be > 0".into()));
        }

        let mut request = ProviderRequest::new(self.model.clone(), messages.to_vec());
        request.temperature = params.temperature;
        request.max_tokens = Some(params.max_tokens);
        request.tools = tools.to_vec();
        request.tool_choice = params.tool_choice;
        request.parallel_tool_calls = params.parallel_tool_calls;
        request.stop = params.stop.clone();
        Ok(request)
    }

    /// Admission, retry and accounting around one logical call.
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .retry
            .run(&self.cancel, |attempt| {
                let request = request.clone();
                async move {
                    if let Err(retry_after) = self.rate_window.try_admit() {
                        debug!(retry_after_ms = retry_after.as_millis() as u64, "Rate window full");
                        return Err(ProviderError::RateLimited { retry_after });
                    }

                    debug!(provider = %self.provider.name(), attempt, "Calling backend");
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
                        result = self.provider.complete(request) => result,
                    }
                }
            })
            .await;

        match response {
            Ok(response) => {
                match &response.usage {
                    Some(usage) => self.usage.add(usage),
                    None => {
                        warn!(provider = %self.provider.name(), "Response carried no usage");
                        self.usage.add(&Usage::default());
                    }
                }
                Ok(response)
            }
            Err(e) => Err(e),
        }
    }
}
