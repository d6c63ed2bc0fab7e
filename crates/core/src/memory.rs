//! Memory retriever trait: the narrow contract to long-term memory.
//!
//! The reasoning loop consults memory exactly twice per run: once before
//! the first backend call, to inject relevant context into the opening
//! system message, and once after termination, to record the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// A past run that resembles the current task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarRun {
    pub task: String,
    pub outcome: String,
    pub success: bool,
    /// Relevance score (higher = more similar)
    #[serde(default)]
    pub score: f32,
}

/// Context retrieved for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedContext {
    #[serde(default)]
    pub similar_runs: Vec<SimilarRun>,
    /// Things to avoid, learned from failures.
    #[serde(default)]
    pub lessons: Vec<String>,
    /// Approaches that worked before.
    #[serde(default)]
    pub strategies: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.similar_runs.is_empty() && self.lessons.is_empty() && self.strategies.is_empty()
    }

    /// Render as a section appended to the system prompt.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut ctx = String::from("\n\n## Relevant Experience\n");
        if !self.similar_runs.is_empty() {
            ctx.push_str("Similar past tasks:\n");
            for run in &self.similar_runs {
                let mark = if run.success { "succeeded" } else { "failed" };
                ctx.push_str(&format!("- {} ({mark}): {}\n", run.task, run.outcome));
            }
        }
        if !self.lessons.is_empty() {
            ctx.push_str("Lessons:\n");
            for lesson in &self.lessons {
                ctx.push_str(&format!("- {lesson}\n"));
            }
        }
        if !self.strategies.is_empty() {
            ctx.push_str("Strategies that worked:\n");
            for strategy in &self.strategies {
                ctx.push_str(&format!("- {strategy}\n"));
            }
        }
        ctx
    }
}

/// The outcome of one run, as handed to memory after termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub task: String,
    /// Actions taken, in order (e.g. `file(read)`).
    pub actions: Vec<String>,
    pub outcome: String,
    pub success: bool,
    /// Free-form run context (protocol, iterations, stop reason, …)
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Long-term memory as seen from the reasoning loop.
#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// The backend name (e.g., "in_memory", "none").
    fn name(&self) -> &str;

    async fn retrieve(&self, task: &str, max_results: usize) -> std::result::Result<RetrievedContext, MemoryError>;

    /// Store a finished run; returns a short summary of what was learned.
    async fn record(&self, record: RunRecord) -> std::result::Result<String, MemoryError>;
}
