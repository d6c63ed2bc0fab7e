//! In-memory retriever: learns from past runs for the life of the process.

use async_trait::async_trait;
use std::collections::HashSet;
use taskforge_core::error::MemoryError;
use taskforge_core::memory::{MemoryRetriever, RetrievedContext, RunRecord, SimilarRun};
use tokio::sync::RwLock;

/// Words too common to say anything about a task.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "that", "this", "what", "please", "then", "file",
];

/// Keeps finished runs in a Vec and ranks them by keyword overlap.
pub struct InMemoryRetriever {
    runs: RwLock<Vec<RunRecord>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

impl Default for InMemoryRetriever {
    fn default() -> Self {
        Self::new()
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '.' && c != '_')
        .map(|w| w.trim_matches('.').to_lowercase())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Share of the query's keywords that the candidate also has.
fn overlap(query: &HashSet<String>, candidate: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    query.intersection(candidate).count() as f32 / query.len() as f32
}

#[async_trait]
impl MemoryRetriever for InMemoryRetriever {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn retrieve(&self, task: &str, max_results: usize) -> Result<RetrievedContext, MemoryError> {
        let query = keywords(task);
        let runs = self.runs.read().await;

        let mut scored: Vec<(f32, &RunRecord)> = runs
            .iter()
            .map(|run| (overlap(&query, &keywords(&run.task)), run))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        // Most similar first; newer wins ties
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.recorded_at.cmp(&a.1.recorded_at))
        });
        scored.truncate(max_results);

        let mut ctx = RetrievedContext::default();
        for (score, run) in scored {
            ctx.similar_runs.push(SimilarRun {
                task: run.task.clone(),
                outcome: run.outcome.clone(),
                success: run.success,
                score,
            });

            if run.success {
                if !run.actions.is_empty() {
                    let strategy = run.actions.join(" -> ");
                    if !ctx.strategies.contains(&strategy) {
                        ctx.strategies.push(strategy);
                    }
                }
            } else {
                let lesson = format!("A similar run failed: {}", run.outcome);
                if !ctx.lessons.contains(&lesson) {
                    ctx.lessons.push(lesson);
                }
            }
        }
        Ok(ctx)
    }

    async fn record(&self, record: RunRecord) -> Result<String, MemoryError> {
        let summary = format!(
            "recorded {} run with {} action(s)",
            if record.success { "successful" } else { "failed" },
            record.actions.len()
        );
        self.runs.write().await.push(record);
        Ok(summary)
    }
}
