//! Confirmation gate: per-call approval of risky tool operations.
//!
//! The gate classifies each call into a [`Risk`] tier from per-tool tables of
//! safe and dangerous operation tags, then decides whether a human has to
//! approve it. Prompting goes through [`ConfirmationPrompt`]; any failure to
//! get an explicit "yes" blocks the call.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use taskforge_config::{ConfirmationConfig, ConfirmationMode, UnknownOperationPolicy};
use taskforge_core::tool::{Tool, ToolArgs, ToolCategory};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Argument keys a prompt may show, in display order.
const DISPLAY_KEYS: &[&str] = &["path", "command", "url", "query", "destination", "content", "pattern"];

/// At most this many arguments are shown.
pub const MAX_DISPLAY_ARGS: usize = 3;

/// Longer argument values are elided.
pub const MAX_DISPLAY_VALUE: usize = 80;

/// Operations that replace existing content when the target exists.
const OVERWRITE_OPERATIONS: &[&str] = &["write"];

/// The gate's verdict for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Blocked { reason: String },
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// How risky a call looks in `Auto` mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Risk {
    Safe,
    Dangerous { reason: String },
    Unknown,
}

/// What the human is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub operation: String,
    /// Allow-listed, elided `(key, value)` pairs
    pub arguments: Vec<(String, String)>,
    pub reason: String,
}

impl ConfirmationRequest {
    pub fn new(tool_name: &str, operation: &str, args: &ToolArgs, reason: impl Into<String>) -> Self {
        let arguments = DISPLAY_KEYS
            .iter()
            .filter_map(|key| args.get(key).map(|value| (*key, value)))
            .take(MAX_DISPLAY_ARGS)
            .map(|(key, value)| {
                let shown = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                (key.to_string(), elide(&shown, MAX_DISPLAY_VALUE))
            })
            .collect();

        Self {
            tool_name: tool_name.into(),
            operation: operation.into(),
            arguments,
            reason: reason.into(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("Confirm {}({})", self.tool_name, self.operation);
        if !self.reason.is_empty() {
            out.push_str(&format!(" [{}]", self.reason));
        }
        for (key, value) in &self.arguments {
            out.push_str(&format!("\n  {key}: {value}"));
        }
        out
    }
}

fn elide(value: &str, max_chars: usize) -> String {
    let flat = value.replace('\n', "\\n");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let kept: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Asks a human to approve one call.
///
/// Implementations return `false` on every kind of interruption.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Line-oriented prompt over any async reader and writer.
pub struct LinePrompt<R, W> {
    io: tokio::sync::Mutex<(R, W)>,
    cancel: Option<CancellationToken>,
}

/// Prompt on stderr, answer on stdin.
pub type StdinPrompt = LinePrompt<BufReader<Stdin>, Stderr>;

impl StdinPrompt {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> LinePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: tokio::sync::Mutex::new((reader, writer)),
            cancel: None,
        }
    }

    /// Decline any pending prompt when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    async fn ask(&self, request: &ConfirmationRequest) -> std::io::Result<Option<String>> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        writer
            .write_all(format!("{}\nProceed? [y/N] ", request.render()).as_bytes())
            .await?;
        writer.flush().await?;

        let mut line = String::new();
        let read = match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Ok(None),
                read = reader.read_line(&mut line) => read?,
            },
            None => reader.read_line(&mut line).await?,
        };

        // EOF
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

#[async_trait]
impl<R, W> ConfirmationPrompt for LinePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        match self.ask(request).await {
            Ok(Some(answer)) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(None) => {
                debug!(tool = %request.tool_name, "Confirmation interrupted");
                false
            }
            Err(e) => {
                warn!(tool = %request.tool_name, error = %e, "Confirmation prompt failed");
                false
            }
        }
    }
}

/// Declines everything. For non-interactive runs.
#[derive(Debug, Default)]
pub struct DenyPrompt;

#[async_trait]
impl ConfirmationPrompt for DenyPrompt {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        false
    }
}

/// Replays scripted answers and records what it was asked.
///
/// `None` in the script simulates an interrupted prompt. Once the script
/// runs out every request is declined.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<Vec<Option<bool>>>,
    asked: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedPrompt {
    pub fn new(answers: Vec<Option<bool>>) -> Self {
        let mut answers = answers;
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn approving(count: usize) -> Self {
        Self::new(vec![Some(true); count])
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.asked.lock().map(|asked| asked.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }
        let answer = self.answers.lock().ok().and_then(|mut a| a.pop()).flatten();
        answer.unwrap_or(false)
    }
}

/// Built-in operation tables for the reference tools.
fn builtin_tables() -> (HashMap<String, HashSet<String>>, HashMap<String, HashSet<String>>) {
    let table = |entries: &[(&str, &[&str])]| -> HashMap<String, HashSet<String>> {
        entries
            .iter()
            .map(|(tool, ops)| (tool.to_string(), ops.iter().map(|op| op.to_string()).collect()))
            .collect()
    };

    let safe = table(&[("file", &["read", "list", "exists"])]);
    let dangerous = table(&[("file", &["delete"]), ("shell", &["execute"])]);
    (safe, dangerous)
}

/// Approval policy applied before every tool execution.
pub struct ConfirmationGate {
    mode: ConfirmationMode,
    unknown: UnknownOperationPolicy,
    safe: HashMap<String, HashSet<String>>,
    dangerous: HashMap<String, HashSet<String>>,
    workspace_root: PathBuf,
    prompt: Arc<dyn ConfirmationPrompt>,
}

impl ConfirmationGate {
    pub fn new(mode: ConfirmationMode, prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        let (safe, dangerous) = builtin_tables();
        Self {
            mode,
            unknown: UnknownOperationPolicy::default(),
            safe,
            dangerous,
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            prompt,
        }
    }

    /// Built-in tables merged with the configured ones.
    pub fn from_config(config: &ConfirmationConfig, prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        let mut gate = Self::new(config.mode, prompt).with_unknown_policy(config.unknown_operation);
        for (tool, ops) in &config.safe_operations {
            for op in ops {
                gate = gate.mark_safe(tool, op);
            }
        }
        for (tool, ops) in &config.dangerous_operations {
            for op in ops {
                gate = gate.mark_dangerous(tool, op);
            }
        }
        gate
    }

    /// A gate that approves everything without asking.
    pub fn permissive() -> Self {
        Self::new(ConfirmationMode::AlwaysYes, Arc::new(DenyPrompt))
    }

    pub fn with_unknown_policy(mut self, policy: UnknownOperationPolicy) -> Self {
        self.unknown = policy;
        self
    }

    /// Root for resolving relative paths in the overwrite check.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_mode(mut self, mode: ConfirmationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Moves the tag out of the dangerous table; the latest mark wins.
    pub fn mark_safe(mut self, tool: &str, operation: &str) -> Self {
        if let Some(ops) = self.dangerous.get_mut(tool) {
            ops.remove(operation);
        }
        self.safe.entry(tool.to_string()).or_default().insert(operation.to_string());
        self
    }

    pub fn mark_dangerous(mut self, tool: &str, operation: &str) -> Self {
        if let Some(ops) = self.safe.get_mut(tool) {
            ops.remove(operation);
        }
        self.dangerous.entry(tool.to_string()).or_default().insert(operation.to_string());
        self
    }

    pub fn mode(&self) -> ConfirmationMode {
        self.mode
    }

    fn listed(table: &HashMap<String, HashSet<String>>, tool: &str, operation: &str) -> bool {
        table.get(tool).is_some_and(|ops| ops.contains(operation))
    }

    /// Classify a call for `Auto` mode.
    pub fn assess(&self, tool: &dyn Tool, operation: &str, args: &ToolArgs) -> Risk {
        let name = tool.name();

        if Self::listed(&self.safe, name, operation) {
            return Risk::Safe;
        }
        if Self::listed(&self.dangerous, name, operation) {
            return Risk::Dangerous {
                reason: format!("'{operation}' is a dangerous operation"),
            };
        }
        if tool.category() == ToolCategory::FileSystem
            && OVERWRITE_OPERATIONS.contains(&operation)
            && let Some(path) = args.get_str("path")
            && self.target_exists(path)
        {
            return Risk::Dangerous {
                reason: format!("would overwrite existing file {path}"),
            };
        }
        if tool.requires_confirmation() {
            return Risk::Dangerous {
                reason: format!("{name} requires confirmation"),
            };
        }
        Risk::Unknown
    }

    fn target_exists(&self, path: &str) -> bool {
        let path = Path::new(path);
        if path.is_absolute() {
            path.exists()
        } else {
            self.workspace_root.join(path).exists()
        }
    }

    /// Decide whether `tool` may run with `args`.
    pub async fn check(&self, tool: &dyn Tool, args: &ToolArgs) -> GateDecision {
        let operation = tool.operation(args);

        let reason = match self.mode {
            ConfirmationMode::AlwaysYes => return GateDecision::Proceed,
            ConfirmationMode::AlwaysAsk => "confirmation required for every call".to_string(),
            ConfirmationMode::Auto => match self.assess(tool, &operation, args) {
                Risk::Safe => return GateDecision::Proceed,
                Risk::Dangerous { reason } => reason,
                Risk::Unknown => match self.unknown {
                    UnknownOperationPolicy::Approve => {
                        debug!(tool = tool.name(), operation = %operation, "Unlisted operation approved");
                        return GateDecision::Proceed;
                    }
                    UnknownOperationPolicy::Confirm => format!("'{operation}' is not a known operation"),
                },
            },
        };

        let request = ConfirmationRequest::new(tool.name(), &operation, args, reason);
        if self.prompt.confirm(&request).await {
            info!(tool = tool.name(), operation = %operation, "Operation approved");
            GateDecision::Proceed
        } else {
            info!(tool = tool.name(), operation = %operation, "Operation declined");
            GateDecision::Blocked {
                reason: format!("{}({operation}) cancelled by user", tool.name()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::error::ToolError;
    use taskforge_core::tool::{ParamSpec, ParamType, ToolResult};

    struct FileLike;

    #[async_trait]
    impl Tool for FileLike {
        fn name(&self) -> &str {
            "file"
        }
        fn description(&self) -> &str {
            "file operations"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("operation", ParamType::String, "op")]
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::FileSystem
        }
        async fn execute(&self, _args: &ToolArgs) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("ok"))
        }
    }

    struct ShellLike;

    #[async_trait]
    impl Tool for ShellLike {
        fn name(&self) -> &str {
            "shell"
        }
        fn description(&self) -> &str {
            "run commands"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![]
        }
        fn is_dangerous(&self) -> bool {
            true
        }
        fn operation(&self, _args: &ToolArgs) -> String {
            "execute".into()
        }
        async fn execute(&self, _args: &ToolArgs) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("ok"))
        }
    }

    struct Gadget;

    #[async_trait]
    impl Tool for Gadget {
        fn name(&self) -> &str {
            "gadget"
        }
        fn description(&self) -> &str {
            "unlisted tool"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![]
        }
        async fn execute(&self, _args: &ToolArgs) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("ok"))
        }
    }

    fn file_args(op: &str, path: &str) -> ToolArgs {
        ToolArgs::new().with("operation", op).with("path", path)
    }

    fn auto_gate(prompt: Arc<ScriptedPrompt>) -> ConfirmationGate {
        ConfirmationGate::new(ConfirmationMode::Auto, prompt)
    }

    #[tokio::test]
    async fn always_yes_never_prompts() {
        let prompt = Arc::new(ScriptedPrompt::default());
        let gate = ConfirmationGate::new(ConfirmationMode::AlwaysYes, prompt.clone());
        let decision = gate.check(&ShellLike, &ToolArgs::new().with("command", "rm -rf /tmp/x")).await;
        assert_eq!(decision, GateDecision::Proceed);
        assert!(prompt.requests().is_empty());
    }

    #[tokio::test]
    async fn always_ask_prompts_even_for_reads() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![Some(true)]));
        let gate = ConfirmationGate::new(ConfirmationMode::AlwaysAsk, prompt.clone());
        assert!(gate.check(&FileLike, &file_args("read", "a.txt")).await.is_proceed());
        assert_eq!(prompt.requests().len(), 1);
    }

    #[tokio::test]
    async fn auto_skips_safe_and_confirms_dangerous() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![Some(true)]));
        let gate = auto_gate(prompt.clone());

        assert!(gate.check(&FileLike, &file_args("read", "a.txt")).await.is_proceed());
        assert!(prompt.requests().is_empty());

        assert!(gate.check(&FileLike, &file_args("delete", "a.txt")).await.is_proceed());
        let asked = prompt.requests();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].operation, "delete");
    }

    #[tokio::test]
    async fn declined_dangerous_call_is_blocked() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![Some(false)]));
        let gate = auto_gate(prompt.clone());
        let decision = gate.check(&ShellLike, &ToolArgs::new().with("command", "ls")).await;
        assert!(matches!(decision, GateDecision::Blocked { reason } if reason.contains("cancelled by user")));
    }

    #[tokio::test]
    async fn overwrite_escalates_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("exists.txt"), "old").unwrap();

        let prompt = Arc::new(ScriptedPrompt::new(vec![Some(false)]));
        let gate = auto_gate(prompt.clone()).with_workspace_root(dir.path());

        // Creating is unlisted and approved by default
        assert!(gate.check(&FileLike, &file_args("write", "new.txt")).await.is_proceed());
        assert!(prompt.requests().is_empty());

        let decision = gate.check(&FileLike, &file_args("write", "exists.txt")).await;
        assert!(!decision.is_proceed());
        let asked = prompt.requests();
        assert_eq!(asked.len(), 1);
        assert!(asked[0].reason.contains("overwrite"));
    }

    #[tokio::test]
    async fn unknown_policy_controls_unlisted_operations() {
        let prompt = Arc::new(ScriptedPrompt::default());
        let approve = auto_gate(prompt.clone());
        assert!(approve.check(&Gadget, &ToolArgs::new()).await.is_proceed());
        assert!(prompt.requests().is_empty());

        let confirm = auto_gate(prompt.clone()).with_unknown_policy(UnknownOperationPolicy::Confirm);
        assert!(!confirm.check(&Gadget, &ToolArgs::new()).await.is_proceed());
        assert_eq!(prompt.requests().len(), 1);
    }

    #[tokio::test]
    async fn interruption_fails_closed_every_time() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![None, None, None]));
        let gate = auto_gate(prompt.clone());
        for _ in 0..5 {
            let decision = gate.check(&FileLike, &file_args("delete", "a.txt")).await;
            assert!(matches!(decision, GateDecision::Blocked { .. }));
        }
        assert_eq!(prompt.requests().len(), 5);
    }

    #[tokio::test]
    async fn config_tables_merge_with_builtins() {
        let mut config = ConfirmationConfig::default();
        config.dangerous_operations.insert("file".into(), vec!["append".into()]);
        config.safe_operations.insert("file".into(), vec!["delete".into()]);

        let prompt = Arc::new(ScriptedPrompt::default());
        let gate = ConfirmationGate::from_config(&config, prompt.clone());

        assert!(gate.check(&FileLike, &file_args("delete", "x")).await.is_proceed());
        assert!(!gate.check(&FileLike, &file_args("append", "x")).await.is_proceed());
        assert!(gate.check(&FileLike, &file_args("read", "x")).await.is_proceed());
    }

    #[test]
    fn request_shows_at_most_three_allow_listed_args() {
        let args = ToolArgs::new()
            .with("api_key", "sk-secret")
            .with("pattern", "*.rs")
            .with("content", "x".repeat(200))
            .with("path", "src/main.rs")
            .with("command", "cargo fmt");
        let request = ConfirmationRequest::new("tool", "op", &args, "why");

        let keys: Vec<&str> = request.arguments.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["path", "command", "content"]);
        assert!(!request.render().contains("sk-secret"));

        let content = &request.arguments[2].1;
        assert_eq!(content.chars().count(), MAX_DISPLAY_VALUE);
        assert!(content.ends_with("..."));
    }

    #[test]
    fn elide_is_char_boundary_safe() {
        let s = "é".repeat(100);
        let out = elide(&s, 10);
        assert_eq!(out.chars().count(), 10);
    }

    #[tokio::test]
    async fn line_prompt_accepts_yes() {
        let prompt = LinePrompt::new(BufReader::new(&b"yes\n"[..]), Vec::new());
        let request = ConfirmationRequest::new("shell", "execute", &ToolArgs::new(), "");
        assert!(prompt.confirm(&request).await);
    }

    #[tokio::test]
    async fn line_prompt_declines_other_answers_and_eof() {
        let request = ConfirmationRequest::new("shell", "execute", &ToolArgs::new(), "");

        let prompt = LinePrompt::new(BufReader::new(&b"sure\n"[..]), Vec::new());
        assert!(!prompt.confirm(&request).await);

        let prompt = LinePrompt::new(BufReader::new(&b""[..]), Vec::new());
        assert!(!prompt.confirm(&request).await);
        // Still closed on the next read
        assert!(!prompt.confirm(&request).await);
    }

    #[tokio::test]
    async fn line_prompt_declines_on_cancellation() {
        let (_client, server) = tokio::io::duplex(64);
        let (read_half, _write_half) = tokio::io::split(server);
        let token = CancellationToken::new();
        let prompt = LinePrompt::new(BufReader::new(read_half), Vec::new()).with_cancellation(token.clone());

        token.cancel();
        let request = ConfirmationRequest::new("file", "delete", &ToolArgs::new(), "");
        assert!(!prompt.confirm(&request).await);
    }
}
