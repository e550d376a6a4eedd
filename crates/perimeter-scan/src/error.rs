//! Error types for the perimeter-scan crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{tool} not found or not executable")]
    ToolUnavailable { tool: String },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Discovery exhausted for {target}: {reason}")]
    DiscoveryExhausted { target: String, reason: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Failed to parse tool output: {0}")]
    Parse(String),

    #[error("TLS audit of {host}:{port} failed: {reason}")]
    Tls {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether the error came from the deadline or cancellation token rather
    /// than from the tool or target.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
