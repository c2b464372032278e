//! Error types for workflow discovery, data exchange and execution.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while working with a KNIME workflow.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Workflow definition missing or unreadable.
    #[error("Workflow definition not found: {}", .0.display())]
    DefinitionNotFound(PathBuf),

    /// Workflow definition present but not parseable.
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Expected element missing from the node registry.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Wire payload violates the table-spec/table-data structure.
    #[error("Format error: {0}")]
    Format(String),

    /// The engine reported the workflow is held by another running instance.
    #[error("Workflow is locked by another KNIME instance")]
    ResourceLocked { stdout: String, stderr: String },

    /// The engine terminated without writing an expected output file.
    #[error("Output from KNIME not found: {} (exit code {exit_code})", .path.display())]
    ExecutionOutputMissing {
        path: PathBuf,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The engine produced an output that is not a valid table payload.
    #[error("Invalid output from KNIME ({origin}): {reason}")]
    InvalidOutput {
        /// Output file (local) or output name (remote).
        origin: String,
        reason: String,
        /// Engine stdout/stderr (local) or response body (remote).
        captured: String,
    },

    /// The server answered an execution request with a non-success status.
    #[error("Remote execution failed with HTTP {status}: {body}")]
    RemoteExecution { status: u16, body: String },

    /// KNIME executable missing.
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    /// Slot position outside the discovered range.
    #[error("Slot {position} out of range ({len} slots)")]
    SlotOutOfRange { position: usize, len: usize },

    /// Process spawn error.
    #[error("Process error: {0}")]
    Process(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Captured engine output or response body attached to the error, if any.
    pub fn captured_output(&self) -> Option<String> {
        match self {
            BridgeError::ResourceLocked { stdout, stderr }
            | BridgeError::ExecutionOutputMissing { stdout, stderr, .. } => Some(format_captured(stdout, stderr)),
            BridgeError::InvalidOutput { captured, .. } => Some(captured.clone()),
            BridgeError::RemoteExecution { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

/// Engine stdout and stderr as a single block.
pub(crate) fn format_captured(stdout: &str, stderr: &str) -> String {
    format!("stdout:\n{}\nstderr:\n{}", stdout, stderr)
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Http(e.to_string())
    }
}

impl From<roxmltree::Error> for BridgeError {
    fn from(e: roxmltree::Error) -> Self {
        BridgeError::InvalidDefinition(e.to_string())
    }
}
