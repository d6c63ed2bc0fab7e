//! Shell tool: execute system commands.
//!
//! Supports command allowlisting, workspace scoping, and a wall-clock timeout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use taskforge_config::ShellConfig;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{ParamSpec, ParamType, Tool, ToolArgs, ToolCategory, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

/// Output beyond this many bytes is cut.
const MAX_OUTPUT_BYTES: usize = 50_000;

/// Separators that start a new command in `sh -c`.
const CHAIN_SEPARATORS: &[&str] = &["&&", "||", ";", "|", "`", "$(", "\n"];

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
    working_dir: PathBuf,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout: Duration, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_commands,
            timeout,
            working_dir: working_dir.into(),
        }
    }

    pub fn from_config(config: &ShellConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            config.allowed_commands.clone(),
            Duration::from_secs(config.timeout_secs),
            working_dir,
        )
    }

    /// Every chained segment must start with an allowed command.
    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let mut segments = vec![command.to_string()];
        for sep in CHAIN_SEPARATORS {
            segments = segments
                .iter()
                .flat_map(|s| s.split(sep).map(str::to_string).collect::<Vec<_>>())
                .collect();
        }

        segments
            .iter()
            .map(|s| s.split_whitespace().next().unwrap_or(""))
            .filter(|base| !base.is_empty() && *base != ")")
            .all(|base| self.allowed_commands.iter().any(|a| a == base))
    }
}

fn clip(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.trim_end().to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &text[..end])
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return stdout/stderr."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("command", ParamType::String, "The shell command to execute")]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    fn operation(&self, _args: &ToolArgs) -> String {
        "execute".into()
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolResult, ToolError> {
        let command = args.require_str("command")?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "shell".into(),
                reason: format!("'{command}' uses a command outside the allowlist"),
            });
        }

        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.working_dir).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "shell".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(ToolError::Timeout {
                    tool_name: "shell".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = clip(&String::from_utf8_lossy(&output.stdout));
        let stderr = clip(&String::from_utf8_lossy(&output.stderr));
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            let text = if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            return Ok(ToolResult::success(text.trim().to_string()).with_metadata("exit_code", code));
        }

        warn!(command = %command, exit_code = code, "Command failed");
        let detail = if stderr.is_empty() {
            format!("exit code {code}")
        } else {
            format!("exit code {code}: {stderr}")
        };
        let result = if stdout.is_empty() {
            ToolResult::error(detail)
        } else {
            ToolResult::partial(stdout, detail)
        };
        Ok(result.with_metadata("exit_code", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::tool::{ToolStatus, run_tool};

    fn shell(allowed: &[&str]) -> ShellTool {
        ShellTool::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
            std::env::temp_dir(),
        )
    }

    fn command(cmd: &str) -> ToolArgs {
        ToolArgs::new().with("command", cmd)
    }

    #[test]
    fn allowlist_check() {
        let tool = shell(&["ls", "cat", "git"]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("cat file.txt | cat"));
        assert!(tool.is_command_allowed("git status && git log"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("ls; rm -rf /"));
        assert!(!tool.is_command_allowed("cat $(rm x)"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        assert!(shell(&[]).is_command_allowed("anything goes"));
    }

    #[test]
    fn shell_is_dangerous() {
        let tool = shell(&[]);
        assert!(tool.requires_confirmation());
        assert_eq!(tool.operation(&command("ls")), "execute");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let result = run_tool(&shell(&[]), &command("echo hello")).await;
        assert!(result.is_success());
        assert_eq!(result.output, "hello");
        assert_eq!(result.metadata["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_with_output_is_partial() {
        let result = run_tool(&shell(&[]), &command("echo some; exit 3")).await;
        assert_eq!(result.status, ToolStatus::Partial);
        assert_eq!(result.output, "some");
        assert!(result.error.unwrap().contains("exit code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_without_output_is_error() {
        let result = run_tool(&shell(&[]), &command("echo oops >&2; exit 1")).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.error.unwrap().contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_becomes_error_result() {
        let tool = ShellTool::new(vec![], Duration::from_millis(100), std::env::temp_dir());
        let result = run_tool(&tool, &command("sleep 5")).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.metadata["error_kind"], "timeout");
    }

    #[tokio::test]
    async fn blocked_command() {
        let result = run_tool(&shell(&["ls"]), &command("rm -rf /")).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.metadata["error_kind"], "permission");
    }
}
