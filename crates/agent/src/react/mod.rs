//! ReAct loop: Thought → Action → Observation over plain text.
//!
//! The model sees the tool catalogue as prose and answers in the grammar
//! described in [`parser`]. Each prompt is rebuilt from the task and the last
//! `history_window` steps, so the request size stays flat however long the
//! run goes.
//!
//! The loop terminates on a parsed final answer, on budget exhaustion, on a
//! backend failure, or at the iteration limit after one forced summary call
//! with `tool_choice = none`.

pub mod parser;

use async_trait::async_trait;
use std::time::Instant;
use taskforge_core::message::{Conversation, Message};
use taskforge_core::provider::ToolChoice;
use tracing::{debug, info, warn};

use crate::Agent;
use crate::runtime::{LoopRuntime, RunScope, failure_answer, limit_message};
use crate::state::{LoopState, RunOutcome, StopReason};
use parser::ReactStep;

const PROTOCOL: &str = "react";

const FORMAT: &str = "Respond in exactly one of these two formats.\n\n\
To use a tool:\n\
Thought: <your reasoning>\n\
Action: <tool name>\n\
Action Input: <arguments as a JSON object>\n\n\
When you know the answer:\n\
Thought: <your reasoning>\n\
Final Answer: <the answer for the user>\n\n\
Use one action per reply and stop after 'Action Input'. The observation will be given to you.";

pub struct ReactAgent {
    runtime: LoopRuntime,
}

impl ReactAgent {
    pub fn new(runtime: LoopRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &LoopRuntime {
        &self.runtime
    }

    fn system_prompt(&self, memory_context: &str) -> String {
        let mut prompt = format!(
            "You are a task agent. You solve the user's task step by step using tools.\n\n\
             Available tools:\n{}\n\n{FORMAT}",
            self.runtime.dispatcher.registry().describe()
        );
        if !memory_context.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(memory_context);
        }
        prompt
    }

    /// The user turn: task, recent steps, and any correction.
    fn step_prompt(&self, task: &str, state: &LoopState, closing: &str) -> String {
        let mut prompt = format!("Task: {task}");

        let recent = state.recent(self.runtime.settings.history_window);
        if !recent.is_empty() {
            prompt.push_str("\n\nSteps so far:");
            for entry in recent {
                prompt.push_str(&format!(
                    "\nAction: {}\nAction Input: {}\nObservation: {}\n",
                    entry.action, entry.arguments, entry.observation
                ));
            }
        }

        if let Some(problem) = &state.format_reminder {
            prompt.push_str(&format!(
                "\n\nYour previous reply could not be understood ({problem}). {FORMAT}"
            ));
        }

        prompt.push_str("\n\n");
        prompt.push_str(closing);
        prompt
    }

    /// One last call once the iteration limit is reached.
    async fn summarize(
        &self,
        run: &RunScope<'_>,
        state: &mut LoopState,
        system: &str,
        mut transcript: Conversation,
    ) -> RunOutcome {
        let closing = format!(
            "You have used all {} steps. Do not call any more tools. \
             Reply with 'Final Answer:' and your best answer from the observations so far.",
            state.max_iterations
        );
        let messages = vec![
            Message::system(system),
            Message::user(self.step_prompt(run.task, state, &closing)),
        ];
        let params = self.runtime.params.clone().with_tool_choice(ToolChoice::None);

        let started = Instant::now();
        let result = self
            .runtime
            .call_backend(|| self.runtime.client.chat(&messages, &params))
            .await;

        let answer = match result {
            Ok(output) => {
                self.runtime.account(run, state, &output.usage, started);
                transcript.push(Message::assistant(output.text.clone()));
                if state.budget_exceeded() {
                    return self
                        .runtime
                        .finish(run, state, state.budget_message(), StopReason::TokenBudgetExceeded, transcript.messages)
                        .await;
                }
                match parser::parse(&output.text) {
                    Ok(ReactStep::Final { answer, .. }) => answer,
                    _ if !output.text.trim().is_empty() => output.text.trim().to_string(),
                    _ => limit_message(state),
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
impl Agent for ReactAgent {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    async fn run(&self, task: &str) -> RunOutcome {
        let run = RunScope::new(task, PROTOCOL);
        let mut state = self.runtime.new_state();

        let memory_context = self.runtime.recall(task).await;
        let system = self.system_prompt(&memory_context);

        let mut transcript = Conversation::new();
        transcript.push(Message::system(system.clone()));
        transcript.push(Message::user(format!("Task: {task}")));

        let params = self.runtime.params.clone().with_stop("\nObservation:");

        info!(
            run_id = %run.run_id,
            model = %self.runtime.client.model(),
            max_iterations = state.max_iterations,
            token_budget = state.token_budget,
            "ReAct loop starting"
        );

        while state.advance() {
            if self.runtime.is_cancelled() {
                return self
                    .runtime
                    .finish(&run, &state, "Stopped: run cancelled".into(), StopReason::Cancelled, transcript.messages)
                    .await;
            }

            let messages = vec![
                Message::system(system.as_str()),
                Message::user(self.step_prompt(task, &state, "What is your next step?")),
            ];
            state.format_reminder = None;

            let started = Instant::now();
            let output = match self
                .runtime
                .call_backend(|| self.runtime.client.chat(&messages, &params))
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
            transcript.push(Message::assistant(output.text.clone()));

            if state.budget_exceeded() {
                warn!(
                    tokens_used = state.tokens_used,
                    token_budget = state.token_budget,
                    "Token budget exhausted"
                );
                return self
                    .runtime
                    .finish(&run, &state, state.budget_message(), StopReason::TokenBudgetExceeded, transcript.messages)
                    .await;
            }

            match parser::parse(&output.text) {
                Ok(ReactStep::Final { answer, .. }) => {
                    info!(iterations = state.iteration, "ReAct loop complete");
                    return self
                        .runtime
                        .finish(&run, &state, answer, StopReason::FinalAnswer, transcript.messages)
                        .await;
                }
                Ok(ReactStep::Action { thought, tool, input }) => {
                    debug!(
                        iteration = state.iteration,
                        thought = thought.as_deref().unwrap_or(""),
                        tool = %tool,
                        "ReAct action"
                    );
                    let entry = self.runtime.dispatcher.dispatch(&state, &tool, Ok(input)).await;
                    transcript.push(Message::user(format!("Observation: {}", entry.observation)));
                    state.record(entry);
                }
                Err(e) => {
                    warn!(iteration = state.iteration, error = %e, "Could not parse model reply");
                    state.format_reminder = Some(e.to_string());
                }
            }
        }

        info!(max_iterations = state.max_iterations, "Iteration limit reached, asking for a summary");
        self.summarize(&run, &mut state, &system, transcript).await
    }
}
