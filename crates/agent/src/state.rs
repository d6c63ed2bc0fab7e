//! Per-run loop state and the outcome handed back to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use taskforge_core::message::Message;
use taskforge_core::tool::ToolStatus;

/// Window inspected by loop detection.
pub const REPEAT_WINDOW: usize = 3;

/// An action is a repeat once it appears this often inside the window.
pub const REPEAT_THRESHOLD: usize = 2;

/// One completed action and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Tool name the model asked for.
    pub action: String,

    /// Operation tag, when the tool could be resolved.
    pub operation: Option<String>,

    /// Arguments as compact JSON.
    pub arguments: String,

    pub observation: String,

    /// `None` when nothing was executed (repeat, unknown tool, bad arguments).
    pub status: Option<ToolStatus>,
}

impl HistoryEntry {
    /// `name(op)` for tagged actions, the bare name otherwise.
    pub fn label(&self) -> String {
        match &self.operation {
            Some(op) => format!("{}({op})", self.action),
            None => self.action.clone(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FinalAnswer,
    MaxIterations,
    TokenBudgetExceeded,
    BackendFailure,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::MaxIterations => "max_iterations",
            Self::TokenBudgetExceeded => "token_budget_exceeded",
            Self::BackendFailure => "backend_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state owned by a single `run`.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub iteration: u32,
    pub max_iterations: u32,
    pub tokens_used: u64,
    pub token_budget: u64,
    pub history: Vec<HistoryEntry>,

    /// Set after an unparseable reply; cleared once the next prompt carries it.
    pub format_reminder: Option<String>,
}

impl LoopState {
    pub fn new(max_iterations: u32, token_budget: u64) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            tokens_used: 0,
            token_budget,
            history: Vec::new(),
            format_reminder: None,
        }
    }

    /// Start the next iteration. `false` once the limit is reached.
    pub fn advance(&mut self) -> bool {
        if self.iteration >= self.max_iterations {
            return false;
        }
        self.iteration += 1;
        true
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn budget_exceeded(&self) -> bool {
        self.tokens_used > self.token_budget
    }

    pub fn budget_message(&self) -> String {
        format!(
            "Stopped: token budget exhausted (used {} of {} tokens)",
            self.tokens_used, self.token_budget
        )
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// True when the same tool with the same arguments already fills the
    /// repeat threshold of the recent window.
    pub fn is_repeating(&self, action: &str, arguments: &str) -> bool {
        self.history
            .iter()
            .rev()
            .take(REPEAT_WINDOW)
            .filter(|entry| entry.action == action && entry.arguments == arguments)
            .count()
            >= REPEAT_THRESHOLD
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Labels of the actions that actually reached a tool.
    pub fn action_labels(&self) -> Vec<String> {
        self.history
            .iter()
            .filter(|entry| entry.status.is_some())
            .map(HistoryEntry::label)
            .collect()
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub tokens_used: u64,

    /// `tool(op)` labels in execution order.
    pub actions: Vec<String>,

    pub transcript: Vec<Message>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.stop_reason == StopReason::FinalAnswer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: &str) -> HistoryEntry {
        HistoryEntry {
            action: action.into(),
            operation: None,
            arguments: "{}".into(),
            observation: "ok".into(),
            status: Some(ToolStatus::Success),
        }
    }

    #[test]
    fn advance_stops_at_limit() {
        let mut state = LoopState::new(2, 100);
        assert!(state.advance());
        assert!(state.advance());
        assert!(!state.advance());
        assert_eq!(state.iteration, 2);
    }

    #[test]
    fn budget_is_exceeded_only_past_the_limit() {
        let mut state = LoopState::new(5, 100);
        state.add_tokens(100);
        assert!(!state.budget_exceeded());
        state.add_tokens(1);
        assert!(state.budget_exceeded());
        assert!(state.budget_message().contains("used 101 of 100"));
    }

    #[test]
    fn repeat_needs_two_hits_in_last_three() {
        let mut state = LoopState::new(10, 1000);
        state.record(entry("file"));
        assert!(!state.is_repeating("file", "{}"));

        state.record(entry("shell"));
        state.record(entry("file"));
        assert!(state.is_repeating("file", "{}"));
        assert!(!state.is_repeating("shell", "{}"));

        // The first "file" falls out of the window.
        state.record(entry("shell"));
        assert!(!state.is_repeating("file", "{}"));
        assert!(state.is_repeating("shell", "{}"));
    }

    #[test]
    fn same_tool_with_new_arguments_is_not_a_repeat() {
        let mut state = LoopState::new(10, 1000);
        let mut read_a = entry("file");
        read_a.arguments = r#"{"operation":"read","path":"a"}"#.into();
        let mut read_b = entry("file");
        read_b.arguments = r#"{"operation":"read","path":"b"}"#.into();
        state.record(read_a);
        state.record(read_b);

        assert!(!state.is_repeating("file", r#"{"operation":"write","path":"c"}"#));
        assert!(!state.is_repeating("file", r#"{"operation":"read","path":"a"}"#));
    }

    #[test]
    fn labels_include_operation() {
        let mut tagged = entry("file");
        tagged.operation = Some("read".into());
        assert_eq!(tagged.label(), "file(read)");
        assert_eq!(entry("shell").label(), "shell");
    }

    #[test]
    fn stop_reason_strings() {
        assert_eq!(StopReason::TokenBudgetExceeded.to_string(), "token_budget_exceeded");
        assert_eq!(
            serde_json::to_string(&StopReason::FinalAnswer).unwrap(),
            "\"final_answer\""
        );
    }
}
