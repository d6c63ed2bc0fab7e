//! Recovery of free text from a failed tool invocation.
//!
//! Some OpenAI-compatible backends (Groq in particular) reject a turn whose
//! tool call they could not parse, and put the raw model output in
//! `error.failed_generation`. That text is often a perfectly good answer.

use regex_lite::Regex;
use std::sync::LazyLock;

static FAILED_GENERATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""failed_generation"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok());

/// Extract the failed generation from an error body.
///
/// Tries structured JSON first, then a pattern match on the raw body for
/// bodies that are truncated or otherwise not valid JSON.
pub fn recover_failed_generation(body: &str) -> Option<String> {
    from_json(body).or_else(|| from_pattern(body)).filter(|text| !text.trim().is_empty())
}

fn from_json(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["failed_generation"]
        .as_str()
        .or_else(|| value["failed_generation"].as_str())
        .map(|s| s.trim().to_string())
}

fn from_pattern(body: &str) -> Option<String> {
    let re = FAILED_GENERATION.as_ref()?;
    let raw = re.captures(body)?.get(1)?.as_str();
    // Undo JSON string escaping when possible
    let text = serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string());
    Some(text.trim().to_string())
}
