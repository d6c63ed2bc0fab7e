//! Collaborators and bookkeeping shared by both reasoning loops.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use taskforge_config::{AgentSettings, AppConfig};
use taskforge_core::error::ProviderError;
use taskforge_core::event::{DomainEvent, EventBus};
use taskforge_core::memory::{MemoryRetriever, RunRecord};
use taskforge_core::message::Message;
use taskforge_core::provider::Usage;
use taskforge_core::tool::ToolRegistry;
use taskforge_providers::{BackendClient, ChatParams, sleep_or_cancel};
use taskforge_security::ConfirmationGate;
use tracing::{debug, info, warn};

use crate::dispatch::ToolDispatcher;
use crate::state::{LoopState, RunOutcome, StopReason};

/// Identity of one run, threaded through its bookkeeping.
pub(crate) struct RunScope<'a> {
    pub run_id: String,
    pub task: &'a str,
    pub protocol: &'static str,
}

impl<'a> RunScope<'a> {
    pub fn new(task: &'a str, protocol: &'static str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task,
            protocol,
        }
    }
}

/// Everything a loop needs besides its own prompting strategy.
pub struct LoopRuntime {
    pub(crate) client: Arc<BackendClient>,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) memory: Option<Arc<dyn MemoryRetriever>>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) settings: AgentSettings,
    pub(crate) params: ChatParams,
}

impl LoopRuntime {
    pub fn new(client: Arc<BackendClient>, registry: Arc<ToolRegistry>, gate: Arc<ConfirmationGate>) -> Self {
        let event_bus = Arc::new(EventBus::default());
        Self {
            client,
            dispatcher: ToolDispatcher::new(registry, gate, event_bus.clone()),
            memory: None,
            event_bus,
            settings: AgentSettings::default(),
            params: ChatParams::default(),
        }
    }

    /// Settings and generation parameters taken from `config`.
    pub fn configured(mut self, config: &AppConfig) -> Self {
        self.settings = config.agent.clone();
        self.params = ChatParams::from_config(&config.backend);
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_params(mut self, params: ChatParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryRetriever>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Publish to `event_bus` instead of a private one.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_event_bus(event_bus.clone());
        self.event_bus = event_bus;
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn is_cancelled(&self) -> bool {
        self.client.cancellation_token().is_cancelled()
    }

    pub(crate) fn new_state(&self) -> LoopState {
        LoopState::new(self.settings.max_iterations, self.settings.token_budget)
    }

    /// Call the backend, waiting out rate limits a bounded number of times.
    ///
    /// The client never retries `RateLimited` itself; the wait happens here
    /// with the hint the fault carries, and cancellation cuts it short.
    pub(crate) async fn call_backend<T, F, Fut>(&self, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut waits = 0;
        loop {
            if self.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            match call().await {
                Err(ProviderError::RateLimited { retry_after }) if waits < self.settings.rate_limit_waits => {
                    waits += 1;
                    warn!(
                        wait = waits,
                        max_waits = self.settings.rate_limit_waits,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Rate limited, waiting before the next call"
                    );
                    sleep_or_cancel(retry_after, self.client.cancellation_token()).await?;
                }
                other => return other,
            }
        }
    }

    /// Charge one backend call to the run.
    pub(crate) fn account(&self, run: &RunScope<'_>, state: &mut LoopState, usage: &Usage, started: Instant) {
        state.add_tokens(u64::from(usage.total_tokens));
        debug!(
            iteration = state.iteration,
            tokens = usage.total_tokens,
            tokens_used = state.tokens_used,
            token_budget = state.token_budget,
            "Backend call accounted"
        );
        self.event_bus.publish(DomainEvent::BackendCallCompleted {
            run_id: run.run_id.clone(),
            model: self.client.model().to_string(),
            tokens_used: usage.total_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    /// Memory context for the opening system message, or empty.
    pub(crate) async fn recall(&self, task: &str) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        match memory.retrieve(task, self.settings.memory_results).await {
            Ok(context) if !context.is_empty() => {
                debug!(
                    similar = context.similar_runs.len(),
                    lessons = context.lessons.len(),
                    "Recalled past experience"
                );
                context.render()
            }
            Ok(_) => String::new(),
            Err(e) => {
                warn!(error = %e, "Memory retrieval failed, continuing without it");
                String::new()
            }
        }
    }

    /// Close the run: record it to memory once and publish the outcome.
    pub(crate) async fn finish(
        &self,
        run: &RunScope<'_>,
        state: &LoopState,
        answer: String,
        stop_reason: StopReason,
        transcript: Vec<Message>,
    ) -> RunOutcome {
        let outcome = RunOutcome {
            answer,
            stop_reason,
            iterations: state.iteration,
            tokens_used: state.tokens_used,
            actions: state.action_labels(),
            transcript,
        };

        if let Some(memory) = &self.memory {
            let mut context = serde_json::Map::new();
            context.insert("protocol".into(), run.protocol.into());
            context.insert("stop_reason".into(), stop_reason.as_str().into());
            context.insert("iterations".into(), outcome.iterations.into());
            context.insert("tokens_used".into(), outcome.tokens_used.into());

            let record = RunRecord {
                task: run.task.to_string(),
                actions: outcome.actions.clone(),
                outcome: outcome.answer.clone(),
                success: outcome.is_success(),
                context,
                recorded_at: Utc::now(),
            };
            match memory.record(record).await {
                Ok(summary) => debug!(summary = %summary, "Run recorded to memory"),
                Err(e) => warn!(error = %e, "Failed to record run to memory"),
            }
        }

        info!(
            run_id = %run.run_id,
            stop_reason = %stop_reason,
            iterations = outcome.iterations,
            tokens_used = outcome.tokens_used,
            "Run finished"
        );
        self.event_bus.publish(DomainEvent::RunFinished {
            run_id: run.run_id.clone(),
            stop_reason: stop_reason.as_str().to_string(),
            iterations: outcome.iterations,
            tokens_used: outcome.tokens_used,
            timestamp: Utc::now(),
        });

        outcome
    }
}

/// The answer reported when the backend gives up on a run.
pub(crate) fn failure_answer(error: &ProviderError) -> (String, StopReason) {
    match error {
        ProviderError::Cancelled => ("Stopped: run cancelled".to_string(), StopReason::Cancelled),
        other => (format!("Stopped: backend failure: {other}"), StopReason::BackendFailure),
    }
}

/// The answer reported when the summary call yields nothing usable.
pub(crate) fn limit_message(state: &LoopState) -> String {
    format!(
        "Stopped: reached the limit of {} iterations without a final answer",
        state.max_iterations
    )
}
