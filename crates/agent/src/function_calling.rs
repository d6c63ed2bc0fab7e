//! Function-calling loop: structured tool calls instead of a text grammar.
//!
//! Each backend turn may request several calls. They run one at a time in
//! the order given, and every call id gets exactly one tool-result message
//! before the next backend call, even when the call was skipped, unknown or
//! declined. A turn without tool calls is the final answer.

use async_trait::async_trait;
use std::time::Instant;
use taskforge_core::message::{Conversation, Message};
use taskforge_core::provider::{ToolChoice, ToolDefinition};
use taskforge_core::tool::ToolArgs;
use tracing::{debug, info, warn};

use crate::Agent;
use crate::runtime::{LoopRuntime, RunScope, failure_answer, limit_message};
use crate::state::{LoopState, RunOutcome, StopReason};

const PROTOCOL: &str = "functions";

pub struct FunctionCallingAgent {
    runtime: LoopRuntime,
}

impl FunctionCallingAgent {
    pub fn new(runtime: LoopRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &LoopRuntime {
        &self.runtime
    }

    fn system_prompt(memory_context: &str) -> String {
        let mut prompt = String::from(
            "You are a task agent. Solve the user's task using the provided tools, one step at a time. \
             When you have the answer, reply with it in plain text without calling a tool.",
        );
        if !memory_context.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(memory_context);
        }
        prompt
    }

    /// Messages per request: roughly one call and one result per history entry.
    fn window(&self) -> usize {
        self.runtime.settings.history_window.saturating_mul(2)
    }

    async fn summarize(
        &self,
        run: &RunScope<'_>,
        state: &mut LoopState,
        tools: &[ToolDefinition],
        mut transcript: Conversation,
    ) -> RunOutcome {
        transcript.push(Message::user(format!(
            "You have used all {} steps. Do not call any more tools. \
             Give your best final answer from the results so far.",
            state.max_iterations
        )));
        let messages = transcript.tail_window(self.window());
        let params = self.runtime.params.clone().with_tool_choice(ToolChoice::None);

        let started = Instant::now();
        let result = self
            .runtime
            .call_backend(|| self.runtime.client.chat_with_tools(&messages, tools, &params))
            .await;

        let answer = match result {
            Ok(output) => {
                self.runtime.account(run, state, &output.usage, started);
                let text = output.text.unwrap_or_default();
                transcript.push(Message::assistant(text.clone()));
                if state.budget_exceeded() {
                    return self
                        .runtime
                        .finish(run, state, state.budget_message(), StopReason::TokenBudgetExceeded, transcript.messages)
                        .await;
                }
                if text.trim().is_empty() {
                    limit_message(state)
                } else {
                    text.trim().to_string()
                }
            }
            Err(e) => {
                let (answer, reason) = failure_answer(&e);
                if reason == StopReason::Cancelled {
                    return self.runtime.finish(run, state, answer, reason, transcript.messages).await;
                }
                warn!(error = %e, "Summary call failed");
                limit_message(state)
            }
        };

        self.runtime
            .finish(run, state, answer, StopReason::MaxIterations, transcript.messages)
            .await
    }
}

#[async_trait]
impl Agent for FunctionCallingAgent {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    async fn run(&self, task: &str) -> RunOutcome {
        let run = RunScope::new(task, PROTOCOL);
        let mut state = self.runtime.new_state();

        let memory_context = self.runtime.recall(task).await;
        let mut transcript = Conversation::new();
        transcript.push(Message::system(Self::system_prompt(&memory_context)));
        transcript.push(Message::user(task));

        let tools = self.runtime.dispatcher.registry().definitions();
        let params = self
            .runtime
            .params
            .clone()
            .with_tool_choice(ToolChoice::Auto)
            .with_parallel_tool_calls(false);

        info!(
            run_id = %run.run_id,
            model = %self.runtime.client.model(),
            tools = tools.len(),
            max_iterations = state.max_iterations,
            token_budget = state.token_budget,
            "Function-calling loop starting"
        );

        while state.advance() {
            if self.runtime.is_cancelled() {
                return self
                    .runtime
                    .finish(&run, &state, "Stopped: run cancelled".into(), StopReason::Cancelled, transcript.messages)
                    .await;
            }

            let messages = transcript.tail_window(self.window());
            let started = Instant::now();
            let output = match self
                .runtime
                .call_backend(|| self.runtime.client.chat_with_tools(&messages, &tools, &params))
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    warn!(iteration = state.iteration, error = %e, "Backend call failed");
                    let (answer, reason) = failure_answer(&e);
                    return self.runtime.finish(&run, &state, answer, reason, transcript.messages).await;
                }
            };
            self.runtime.account(&run, &mut state, &output.usage, started);

            let Some(calls) = output.tool_calls else {
                let answer = output.text.unwrap_or_default();
                transcript.push(Message::assistant(answer.clone()));
                if state.budget_exceeded() {
                    return self
                        .runtime
                        .finish(&run, &state, state.budget_message(), StopReason::TokenBudgetExceeded, transcript.messages)
                        .await;
                }
                if output.recovered {
                    debug!("Final answer came from a recovered generation");
                }
                info!(iterations = state.iteration, "Function-calling loop complete");
                return self
                    .runtime
                    .finish(&run, &state, answer, StopReason::FinalAnswer, transcript.messages)
                    .await;
            };

            transcript.push(Message::assistant_with_tools(
                output.text.unwrap_or_default(),
                calls.clone(),
            ));

            if state.budget_exceeded() {
                warn!(
                    tokens_used = state.tokens_used,
                    token_budget = state.token_budget,
                    "Token budget exhausted"
                );
                for call in &calls {
                    transcript.push(Message::tool_result(&call.id, "Not executed: token budget exhausted"));
                }
                return self
                    .runtime
                    .finish(&run, &state, state.budget_message(), StopReason::TokenBudgetExceeded, transcript.messages)
                    .await;
            }

            debug!(iteration = state.iteration, calls = calls.len(), "Executing tool calls");
            let mut cancelled = false;
            for call in &calls {
                if cancelled || self.runtime.is_cancelled() {
                    cancelled = true;
                    transcript.push(Message::tool_result(&call.id, "Cancelled: run cancelled"));
                    continue;
                }
                let args = ToolArgs::from_json_str(&call.arguments);
                let entry = self.runtime.dispatcher.dispatch(&state, &call.name, args).await;
                transcript.push(Message::tool_result(&call.id, entry.observation.as_str()));
                state.record(entry);
            }

            if cancelled {
                return self
                    .runtime
                    .finish(&run, &state, "Stopped: run cancelled".into(), StopReason::Cancelled, transcript.messages)
                    .await;
            }
        }

        info!(max_iterations = state.max_iterations, "Iteration limit reached, asking for a summary");
        self.summarize(&run, &mut state, &tools, transcript).await
    }
}
