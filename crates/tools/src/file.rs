//! File tool: read, write, append, delete, list and probe files.
//!
//! Every path goes through the workspace [`Sandbox`] first. Relative paths
//! are relative to the workspace root.

use async_trait::async_trait;
use std::path::Path;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{ParamSpec, ParamType, Tool, ToolArgs, ToolCategory, ToolResult};
use taskforge_security::Sandbox;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Reads larger than this come back as a partial result.
const MAX_READ_BYTES: usize = 100_000;

const OPERATIONS: &[&str] = &["read", "write", "append", "delete", "list", "exists"];

pub struct FileTool {
    sandbox: Sandbox,
}

impl FileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    fn denied(reason: impl ToString) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: "file".into(),
            reason: reason.to_string(),
        }
    }

    fn failed(reason: impl ToString) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "file".into(),
            reason: reason.to_string(),
        }
    }

    async fn read(&self, display: &str, path: &Path) -> Result<ToolResult, ToolError> {
        if !path.exists() {
            return Ok(ToolResult::error(format!("File does not exist: {display}"))
                .with_metadata("error_kind", "not_found"));
        }
        if path.is_dir() {
            return Ok(ToolResult::error(format!("{display} is a directory; use operation 'list'")));
        }

        let bytes = tokio::fs::read(path).await.map_err(Self::failed)?;
        let total = bytes.len();
        let content = String::from_utf8_lossy(&bytes[..total.min(MAX_READ_BYTES)]).into_owned();

        if total > MAX_READ_BYTES {
            return Ok(ToolResult::partial(
                content,
                format!("truncated to {MAX_READ_BYTES} of {total} bytes"),
            )
            .with_metadata("bytes", total));
        }
        Ok(ToolResult::success(content).with_metadata("bytes", total))
    }

    async fn write(&self, display: &str, path: &Path, content: &str, append: bool) -> Result<ToolResult, ToolError> {
        if path.is_dir() {
            return Ok(ToolResult::error(format!("{display} is a directory")));
        }
        let existed = path.exists();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Self::failed)?;
        }

        if append {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(Self::failed)?;
            file.write_all(content.as_bytes()).await.map_err(Self::failed)?;
            file.flush().await.map_err(Self::failed)?;
        } else {
            tokio::fs::write(path, content).await.map_err(Self::failed)?;
        }

        let action = match (append, existed) {
            (true, true) => "appended",
            (false, true) => "overwritten",
            (_, false) => "created",
        };
        Ok(ToolResult::success(format!("{action} {display} ({} bytes)", content.len()))
            .with_metadata("action", action)
            .with_metadata("bytes", content.len()))
    }

    async fn delete(&self, display: &str, path: &Path) -> Result<ToolResult, ToolError> {
        if !path.exists() {
            return Ok(ToolResult::error(format!("File does not exist: {display}"))
                .with_metadata("error_kind", "not_found"));
        }
        if path.is_dir() {
            return Ok(ToolResult::error(format!("{display} is a directory; refusing to delete")));
        }
        tokio::fs::remove_file(path).await.map_err(Self::failed)?;
        Ok(ToolResult::success(format!("deleted {display}")))
    }

    async fn list(&self, display: &str, path: &Path) -> Result<ToolResult, ToolError> {
        if !path.is_dir() {
            return Ok(ToolResult::error(format!("Directory does not exist: {display}"))
                .with_metadata("error_kind", "not_found"));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await.map_err(Self::failed)?;
        while let Some(entry) = dir.next_entry().await.map_err(Self::failed)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let count = entries.len();
        let output = if entries.is_empty() {
            format!("{display} is empty")
        } else {
            entries.join("\n")
        };
        Ok(ToolResult::success(output).with_metadata("entries", count))
    }

    fn exists(&self, path: &Path) -> ToolResult {
        let kind = if path.is_dir() {
            "directory"
        } else if path.exists() {
            "file"
        } else {
            "none"
        };
        let found = kind != "none";
        ToolResult::success(found.to_string())
            .with_metadata("exists", found)
            .with_metadata("kind", kind)
    }
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Work with files in the workspace. Operations: read, write (create or overwrite), append, delete, list (directory entries), exists."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("operation", ParamType::String, "What to do").with_enum(OPERATIONS),
            ParamSpec::required("path", ParamType::String, "File or directory path, relative to the workspace"),
            ParamSpec::optional("content", ParamType::String, "Text to write or append"),
        ]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileSystem
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolResult, ToolError> {
        let operation = args.require_str("operation")?;
        let display = args.require_str("path")?;
        let path = self.sandbox.resolve(display).map_err(Self::denied)?;

        debug!(operation, path = %path.display(), "File operation");

        match operation {
            "read" => self.read(display, &path).await,
            "write" | "append" => {
                let content = args.get_str("content").ok_or_else(|| {
                    ToolError::InvalidArguments(format!("'{operation}' needs a 'content' argument"))
                })?;
                self.write(display, &path, content, operation == "append").await
            }
            "delete" => self.delete(display, &path).await,
            "list" => self.list(display, &path).await,
            "exists" => Ok(self.exists(&path)),
            other => Err(ToolError::InvalidArguments(format!("unknown operation '{other}'"))),
        }
    }
}
