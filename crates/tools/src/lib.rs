//! Reference tool implementations for Taskforge.
//!
//! Two tools ship with the core: `file` for workspace file operations and
//! `shell` for running commands. Both are sandboxed to the workspace root.

pub mod file;
pub mod shell;

use taskforge_config::AppConfig;
use taskforge_core::error::ToolError;
use taskforge_core::tool::ToolRegistry;
use taskforge_security::Sandbox;

pub use file::FileTool;
pub use shell::ShellTool;

/// Create a registry with the built-in tools, configured from `config`.
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let sandbox = Sandbox::from_config(&config.sandbox);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::from_config(&config.shell, sandbox.root())))?;
    registry.register(Box::new(FileTool::new(sandbox)))?;
    Ok(registry)
}
