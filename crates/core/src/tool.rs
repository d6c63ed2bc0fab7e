//! Tool trait and registry.
//!
//! Tools are what give the agent the ability to act in the world:
//! read and write files, run commands, search, and so on. The reasoning
//! loops never call [`Tool::execute`] directly; every invocation goes through
//! [`ToolRegistry::execute`], which validates arguments, measures time, and
//! turns every failure (including panics) into an error [`ToolResult`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use crate::error::ToolError;
use crate::provider::ToolDefinition;

// ── Parameter schema ──────────────────────────────────────────────────────

/// JSON type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            enum_values: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// Restrict a string parameter to a fixed set of values.
    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }
}

/// Build the JSON Schema object the backend sees for a parameter list.
pub fn parameters_schema(params: &[ParamSpec]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    for p in params {
        let mut prop = serde_json::json!({
            "type": p.param_type.as_str(),
            "description": p.description,
        });
        if let Some(values) = &p.enum_values {
            prop["enum"] = serde_json::json!(values);
        }
        properties.insert(p.name.clone(), prop);
    }
    let required: Vec<&str> = params.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Check `args` against the declared parameters.
///
/// Returns every problem found, not just the first, so the model can fix
/// its call in one step.
pub fn validate_args(params: &[ParamSpec], args: &ToolArgs) -> std::result::Result<(), Vec<String>> {
    let mut problems = Vec::new();

    for p in params {
        match args.get(&p.name) {
            None | Some(serde_json::Value::Null) => {
                if p.required {
                    problems.push(format!("missing required parameter '{}'", p.name));
                }
            }
            Some(value) => {
                if !p.param_type.matches(value) {
                    problems.push(format!(
                        "parameter '{}' must be of type {}",
                        p.name,
                        p.param_type.as_str()
                    ));
                } else if let (Some(allowed), Some(s)) = (&p.enum_values, value.as_str())
                    && !allowed.iter().any(|a| a == s)
                {
                    problems.push(format!(
                        "parameter '{}' must be one of [{}], got '{}'",
                        p.name,
                        allowed.join(", "),
                        s
                    ));
                }
            }
        }
    }

    if problems.is_empty() { Ok(()) } else { Err(problems) }
}

// ── Arguments ─────────────────────────────────────────────────────────────

/// Typed view over a tool call's argument object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(serde_json::Map<String, serde_json::Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a JSON object; `null` is treated as no arguments.
    pub fn from_value(value: serde_json::Value) -> std::result::Result<Self, ToolError> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Parse the argument string a backend sent with a tool call.
    pub fn from_json_str(raw: &str) -> std::result::Result<Self, ToolError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Builder-style insert, mostly for tests and synthetic calls.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| v.as_i64())
    }

    /// A string argument the tool cannot work without.
    pub fn require_str(&self, key: &str) -> std::result::Result<&str, ToolError> {
        self.get_str(key)
            .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }
}

/// A request to execute a tool, parsed from backend output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the backend's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    pub args: ToolArgs,
}

// ── Results ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    /// Some output was produced but the operation did not fully succeed.
    Partial,
    /// The operation never ran (declined at confirmation).
    Cancelled,
}

/// The uniform envelope every tool invocation returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,

    /// The output content
    pub output: String,

    /// What went wrong, for every status other than `Success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Wall time of the invocation
    #[serde(with = "duration_ms", default)]
    pub duration: Duration,
}

impl ToolResult {
    fn new(status: ToolStatus, output: String, error: Option<String>) -> Self {
        Self {
            status,
            output,
            error,
            metadata: serde_json::Map::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new(ToolStatus::Success, output.into(), None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToolStatus::Error, String::new(), Some(message.into()))
    }

    pub fn partial(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolStatus::Partial, output.into(), Some(message.into()))
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ToolStatus::Cancelled, String::new(), Some(reason.into()))
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Render the result as the observation text fed back to the backend.
    pub fn to_observation(&self) -> String {
        let error = self.error.as_deref().unwrap_or("unknown error");
        match self.status {
            ToolStatus::Success if self.output.is_empty() => "(no output)".into(),
            ToolStatus::Success => self.output.clone(),
            ToolStatus::Partial => format!("{}\n[partial: {error}]", self.output),
            ToolStatus::Error => format!("Error: {error}"),
            ToolStatus::Cancelled => format!("Cancelled: {error}"),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ── Tool trait ────────────────────────────────────────────────────────────

/// Coarse grouping used for registry filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileSystem,
    Shell,
    Web,
    Memory,
    Generation,
    General,
}

/// The core Tool trait.
///
/// Implementations report their own domain failures as error results or
/// `Err(ToolError)`; both reach the loop as observations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "file", "shell").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters; the registry validates calls against these.
    fn parameters(&self) -> Vec<ParamSpec>;

    fn category(&self) -> ToolCategory {
        ToolCategory::General
    }

    /// Whether this tool can change state outside the agent.
    fn is_dangerous(&self) -> bool {
        false
    }

    fn requires_confirmation(&self) -> bool {
        self.is_dangerous()
    }

    /// Operation tag for this call, as seen by the confirmation gate.
    fn operation(&self, args: &ToolArgs) -> String {
        args.get_str("operation").unwrap_or(self.name()).to_string()
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, args: &ToolArgs) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: parameters_schema(&self.parameters()),
        }
    }
}

/// Validate, execute, time, and isolate one tool invocation.
///
/// Never panics and never returns a fault: whatever the tool does, the
/// caller gets a [`ToolResult`].
pub async fn run_tool(tool: &dyn Tool, args: &ToolArgs) -> ToolResult {
    let start = Instant::now();

    if let Err(problems) = validate_args(&tool.parameters(), args) {
        let mut result = ToolResult::error(format!(
            "Invalid arguments for '{}': {}",
            tool.name(),
            problems.join("; ")
        ))
        .with_metadata("error_kind", "validation");
        result.duration = start.elapsed();
        return result;
    }

    let outcome = AssertUnwindSafe(tool.execute(args)).catch_unwind().await;

    let mut result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let kind = match &e {
                ToolError::InvalidArguments(_) => "validation",
                ToolError::PermissionDenied { .. } | ToolError::SandboxViolation(_) => "permission",
                ToolError::Timeout { .. } => "timeout",
                _ => "execution",
            };
            ToolResult::error(e.to_string()).with_metadata("error_kind", kind)
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            warn!(tool = %tool.name(), panic = %detail, "Tool panicked during execution");
            ToolResult::error(format!("Tool '{}' crashed: {detail}", tool.name()))
                .with_metadata("error_kind", "panic")
        }
    };

    if result.status != ToolStatus::Success && result.error.as_deref().is_none_or(str::is_empty) {
        result.error = Some(format!("Tool '{}' failed without details", tool.name()));
    }
    result.duration = start.elapsed();
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────

/// Per-tool invocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolStats {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

impl ToolStats {
    pub fn average_duration(&self) -> Duration {
        if self.invocations == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.invocations);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// A registry of available tools.
///
/// The reasoning loops use this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    categories: BTreeMap<ToolCategory, Vec<String>>,
    stats: Mutex<HashMap<String, ToolStats>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            categories: BTreeMap::new(),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.categories.entry(tool.category()).or_default().push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> std::result::Result<&dyn Tool, ToolError> {
        self.tools
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn by_category(&self, category: ToolCategory) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .categories
            .get(&category)
            .map(|v| v.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Tools that neither change state nor need confirmation.
    pub fn read_only_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .values()
            .filter(|t| !t.is_dangerous() && !t.requires_confirmation())
            .map(|t| t.name())
            .collect();
        names.sort_unstable();
        names
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions_filtered(|_| true)
    }

    pub fn definitions_filtered(&self, keep: impl Fn(&dyn Tool) -> bool) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| keep(t.as_ref()))
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// One line per tool, for text-protocol prompts.
    pub fn describe(&self) -> String {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| {
                let params: Vec<String> = t
                    .parameters()
                    .iter()
                    .map(|p| {
                        let marker = if p.required { "" } else { "?" };
                        format!("{}{marker}: {}", p.name, p.param_type.as_str())
                    })
                    .collect();
                format!("- {}({}): {}", t.name(), params.join(", "), t.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up a tool and run it.
    ///
    /// The only failure is `ToolError::NotFound`; everything that goes wrong
    /// inside the tool comes back as an error result.
    pub async fn execute(&self, name: &str, args: &ToolArgs) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.get(name)?;
        debug!(tool = %name, "Executing tool");

        let result = run_tool(tool, args).await;
        self.record(name, &result);
        Ok(result)
    }

    /// Execute a parsed tool call.
    pub async fn execute_call(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        self.execute(&call.name, &call.args).await
    }

    fn record(&self, name: &str, result: &ToolResult) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(name.to_string()).or_default();
        entry.invocations += 1;
        if matches!(result.status, ToolStatus::Error) {
            entry.failures += 1;
        }
        entry.total_duration += result.duration;
    }

    pub fn stats(&self, name: &str) -> Option<ToolStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).get(name).copied()
    }

    pub fn all_stats(&self) -> HashMap<String, ToolStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("text", ParamType::String, "Text to echo"),
                ParamSpec::optional("mode", ParamType::String, "Echo mode").with_enum(&["plain", "loud"]),
            ]
        }
        async fn execute(&self, args: &ToolArgs) -> Result<ToolResult, ToolError> {
            let text = args.require_str("text")?;
            if args.get_str("mode") == Some("loud") {
                return Ok(ToolResult::success(text.to_uppercase()));
            }
            Ok(ToolResult::success(text))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str { "explode" }
        fn description(&self) -> &str { "Always panics" }
        fn parameters(&self) -> Vec<ParamSpec> { vec![] }
        async fn execute(&self, _args: &ToolArgs) -> Result<ToolResult, ToolError> {
            panic!("boom");
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str { "fail" }
        fn description(&self) -> &str { "Always fails" }
        fn parameters(&self) -> Vec<ParamSpec> { vec![] }
        fn category(&self) -> ToolCategory { ToolCategory::Shell }
        fn is_dangerous(&self) -> bool { true }
        async fn execute(&self, _args: &ToolArgs) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed { tool_name: "fail".into(), reason: "disk on fire".into() })
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        registry.register(Box::new(PanickingTool)).unwrap();
        registry.register(Box::new(FailingTool)).unwrap();
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_ok());
        assert!(matches!(registry.get("nonexistent"), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_carry_schema() {
        let registry = registry();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 3);
        let echo = defs.iter().find(|d| d.name == "echo").unwrap();
        assert_eq!(echo.parameters["type"], "object");
        assert_eq!(echo.parameters["required"], serde_json::json!(["text"]));
        assert_eq!(echo.parameters["properties"]["mode"]["enum"], serde_json::json!(["plain", "loud"]));
    }

    #[test]
    fn category_index_filters() {
        let registry = registry();
        assert_eq!(registry.by_category(ToolCategory::Shell), vec!["fail"]);
        assert_eq!(registry.by_category(ToolCategory::Web), Vec::<&str>::new());
        assert_eq!(registry.read_only_names(), vec!["echo", "explode"]);
        let safe = registry.definitions_filtered(|t| !t.is_dangerous());
        assert!(safe.iter().all(|d| d.name != "fail"));
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let registry = registry();
        let args = ToolArgs::new().with("text", "hello world");
        let result = registry.execute("echo", &args).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = registry();
        let err = registry.execute("nonexistent", &ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_fast() {
        let registry = registry();
        let result = registry.execute("echo", &ToolArgs::new()).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.metadata["error_kind"], "validation");
        assert!(result.error.unwrap().contains("missing required parameter 'text'"));
    }

    #[tokio::test]
    async fn wrong_type_and_enum_are_rejected() {
        let registry = registry();
        let args = ToolArgs::new().with("text", 42).with("mode", "whisper");
        let result = registry.execute("echo", &args).await.unwrap();
        let error = result.error.unwrap();
        assert!(error.contains("must be of type string"), "{error}");
        assert!(error.contains("must be one of [plain, loud]"), "{error}");
    }

    #[tokio::test]
    async fn panicking_tool_is_isolated() {
        let registry = registry();
        let result = registry.execute("explode", &ToolArgs::new()).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        let error = result.error.unwrap();
        assert!(!error.is_empty());
        assert!(error.contains("boom"));
    }

    #[tokio::test]
    async fn tool_error_becomes_error_result() {
        let registry = registry();
        let result = registry.execute("fail", &ToolArgs::new()).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.error.unwrap().contains("disk on fire"));
        assert_eq!(result.metadata["error_kind"], "execution");
    }

    #[tokio::test]
    async fn stats_track_invocations_and_failures() {
        let registry = registry();
        let args = ToolArgs::new().with("text", "x");
        registry.execute("echo", &args).await.unwrap();
        registry.execute("echo", &args).await.unwrap();
        registry.execute("fail", &ToolArgs::new()).await.unwrap();

        let echo = registry.stats("echo").unwrap();
        assert_eq!(echo.invocations, 2);
        assert_eq!(echo.failures, 0);
        assert_eq!(registry.stats("fail").unwrap().failures, 1);
        assert!(registry.stats("explode").is_none());
    }

    #[test]
    fn average_duration_past_u32_invocations() {
        let stats = ToolStats {
            invocations: u64::from(u32::MAX) + 1,
            failures: 0,
            total_duration: Duration::from_secs(u64::from(u32::MAX) + 1),
        };
        assert_eq!(stats.average_duration(), Duration::from_secs(1));
        assert_eq!(ToolStats::default().average_duration(), Duration::ZERO);
    }

    #[test]
    fn args_from_backend_string() {
        let args = ToolArgs::from_json_str(r#"{"path": "a.txt"}"#).unwrap();
        assert_eq!(args.get_str("path"), Some("a.txt"));
        assert!(ToolArgs::from_json_str("").unwrap().is_empty());
        assert!(ToolArgs::from_json_str("[1, 2]").is_err());
        assert!(ToolArgs::from_json_str("{not json").is_err());
    }

    #[test]
    fn default_operation_tag() {
        let args = ToolArgs::new().with("operation", "read");
        assert_eq!(EchoTool.operation(&args), "read");
        assert_eq!(EchoTool.operation(&ToolArgs::new()), "echo");
    }

    #[test]
    fn observation_rendering() {
        assert_eq!(ToolResult::success("").to_observation(), "(no output)");
        assert_eq!(ToolResult::error("nope").to_observation(), "Error: nope");
        assert!(ToolResult::cancelled("declined").to_observation().starts_with("Cancelled"));
        assert!(ToolResult::partial("half", "exit 1").to_observation().contains("[partial: exit 1]"));
    }
}
