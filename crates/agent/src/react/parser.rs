//! Parser for the Thought / Action / Final Answer reply grammar.
//!
//! A reply is one of:
//!
//! ```text
//! Thought: <reasoning>
//! Action: <tool name>
//! Action Input: <JSON object>
//! ```
//!
//! or
//!
//! ```text
//! Thought: <reasoning>
//! Final Answer: <answer>
//! ```
//!
//! Labels are case-insensitive and must start a line. When a reply carries both an action and a
//! final answer, whichever comes first wins; models that run ahead tend to
//! invent an observation and answer after it.

use regex_lite::Regex;
use std::sync::LazyLock;
use taskforge_core::tool::ToolArgs;

static THOUGHT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)thought\s*:\s*(.*?)(?:\n\s*(?:action|final\s+answer)\s*:|\z)").ok()
});
static ACTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?im)^\s*action\s*:\s*(.*)$").ok());
static ACTION_INPUT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?is)action\s+input\s*:\s*(.*)").ok());
static FINAL_ANSWER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?ims)^\s*final\s+answer\s*:\s*(.*)").ok());

/// First capture group of `re` in `text`.
fn capture<'t>(re: &Option<Regex>, text: &'t str) -> Option<regex_lite::Match<'t>> {
    re.as_ref()?.captures(text)?.get(1)
}

/// One parsed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactStep {
    Action {
        thought: Option<String>,
        tool: String,
        input: ToolArgs,
    },
    Final {
        thought: Option<String>,
        answer: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("the reply was empty")]
    Empty,

    #[error("the reply has neither an 'Action:' nor a 'Final Answer:' line")]
    NoActionOrAnswer,

    #[error("'Action:' is empty")]
    EmptyAction,

    #[error("'Action: {tool}' has no 'Action Input:' line")]
    MissingActionInput { tool: String },

    #[error("'Action Input' for '{tool}' is not a JSON object: {reason}")]
    InvalidActionInput { tool: String, reason: String },

    #[error("'Final Answer:' is empty")]
    EmptyAnswer,
}

pub fn parse(reply: &str) -> Result<ReactStep, ParseError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ParseError::Empty);
    }

    let thought = capture(&THOUGHT, reply)
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty());

    let action = capture(&ACTION, reply);
    let answer = capture(&FINAL_ANSWER, reply);

    let take_action = match (&action, &answer) {
        (Some(a), Some(f)) => a.start() < f.start(),
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => return Err(ParseError::NoActionOrAnswer),
    };

    if !take_action {
        let answer = answer.map(|m| m.as_str().trim()).unwrap_or_default();
        if answer.is_empty() {
            return Err(ParseError::EmptyAnswer);
        }
        return Ok(ReactStep::Final {
            thought,
            answer: answer.to_string(),
        });
    }

    let Some(action) = action else {
        return Err(ParseError::NoActionOrAnswer);
    };
    let tool = tool_name(action.as_str());
    if tool.is_empty() {
        return Err(ParseError::EmptyAction);
    }

    let rest = &reply[action.end()..];
    let raw_input = capture(&ACTION_INPUT, rest)
        .map(|m| m.as_str())
        .ok_or_else(|| ParseError::MissingActionInput { tool: tool.clone() })?;

    let input = parse_input(&tool, raw_input)?;
    Ok(ReactStep::Action { thought, tool, input })
}

/// The model often decorates the name: `` `file` ``, `"file"`, `file()`.
fn tool_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '*')
        .split(|c: char| c.is_whitespace() || c == '(' || c == '[')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Extract the JSON object following `Action Input:`.
///
/// Anything after an `Observation:` line is the model imagining the tool's
/// answer and is dropped, as are code fences.
fn parse_input(tool: &str, raw: &str) -> Result<ToolArgs, ParseError> {
    let lower = raw.to_ascii_lowercase();
    let end = lower.find("\nobservation").unwrap_or(raw.len());
    let text = raw[..end]
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if text.is_empty() || text.eq_ignore_ascii_case("none") {
        return Ok(ToolArgs::new());
    }

    let invalid = |reason: String| ParseError::InvalidActionInput {
        tool: tool.to_string(),
        reason,
    };
    let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) else {
        return Err(invalid(format!("expected an object, found '{text}'")));
    };
    if close < open {
        return Err(invalid(format!("expected an object, found '{text}'")));
    }

    let value: serde_json::Value =
        serde_json::from_str(&text[open..=close]).map_err(|e| invalid(e.to_string()))?;
    ToolArgs::from_value(value).map_err(|e| invalid(e.to_string()))
}
