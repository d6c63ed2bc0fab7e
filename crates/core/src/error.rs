//! Error types for the Taskforge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Taskforge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a backend transport or the client wrapping it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Backend unavailable: {message} (status: {status_code})")]
    Unavailable { status_code: u16, message: String },

    #[error("Rate limited, retry after {:.1}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend could not produce a tool call: {body}")]
    ToolUseFailed { body: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Closed classification of provider failures.
///
/// Retry policy dispatches on this, never on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Timeout,
    Network,
    Unavailable,
    RateLimited,
    Authentication,
    InvalidRequest,
    InvalidResponse,
    Api,
    ToolUseFailed,
    NotConfigured,
    Cancelled,
}

impl ProviderErrorKind {
    /// Transient kinds that a blind retry may fix.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::Unavailable)
    }
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::ApiError { .. } => ProviderErrorKind::Api,
            Self::Unavailable { .. } => ProviderErrorKind::Unavailable,
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::AuthenticationFailed(_) => ProviderErrorKind::Authentication,
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::Network(_) => ProviderErrorKind::Network,
            Self::InvalidRequest(_) => ProviderErrorKind::InvalidRequest,
            Self::InvalidResponse(_) => ProviderErrorKind::InvalidResponse,
            Self::ToolUseFailed { .. } => ProviderErrorKind::ToolUseFailed,
            Self::NotConfigured(_) => ProviderErrorKind::NotConfigured,
            Self::Cancelled => ProviderErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 400,
            message: "Bad model".into(),
        });
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad model"));
    }

    #[test]
    fn retryable_kinds_are_transient_only() {
        assert!(ProviderError::Timeout("slow".into()).is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(
            ProviderError::Unavailable { status_code: 503, message: String::new() }.is_retryable()
        );

        assert!(!ProviderError::RateLimited { retry_after: Duration::from_secs(1) }.is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("empty".into()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn rate_limited_reports_wait_hint() {
        let err = ProviderError::RateLimited { retry_after: Duration::from_millis(2500) };
        assert!(err.to_string().contains("2.5s"), "{err}");
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "shell".into(),
            reason: "command not in allowlist".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("allowlist"));
    }
}
