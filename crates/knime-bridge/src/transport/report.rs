//! Execution outcome types.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::table::{decode, Table};

/// Non-fatal condition observed during an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionWarning {
    /// An input slot held no value; the engine falls back to its own default.
    UnsetInput { position: usize, node: String },
    /// The engine exited non-zero but produced every expected output.
    NonZeroExit { exit_code: i32 },
    /// The server returned an output that discovery did not declare; it is ignored.
    UndeclaredOutput { name: String },
}

impl std::fmt::Display for ExecutionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionWarning::UnsetInput { position, node } => {
                write!(f, "no input data supplied for slot {} ({})", position, node)
            }
            ExecutionWarning::NonZeroExit { exit_code } => {
                write!(f, "KNIME exited with code {} but produced all outputs", exit_code)
            }
            ExecutionWarning::UndeclaredOutput { name } => {
                write!(f, "ignoring undeclared output '{}'", name)
            }
        }
    }
}

/// What happened during one execution, besides the outputs themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Warnings in the order they were raised.
    pub warnings: Vec<ExecutionWarning>,

    /// Exit code of the batch process (local transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// HTTP status of the execution request (remote transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Wall-clock duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionReport {
    /// Record and log a warning.
    pub fn warn(&mut self, warning: ExecutionWarning) {
        tracing::warn!(warning = %warning, "Execution warning");
        self.warnings.push(warning);
    }

    /// Returns true if no warning was raised.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Positions of input slots that were left unset.
    pub fn unset_inputs(&self) -> Vec<usize> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                ExecutionWarning::UnsetInput { position, .. } => Some(*position),
                _ => None,
            })
            .collect()
    }

    /// Set the execution duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// One output as the engine wrote it, plus its decoded table.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedOutput {
    pub table: Table,

    /// Raw `{table-spec, table-data}` payload, untouched by reconciliation.
    pub payload: Value,
}

impl DecodedOutput {
    /// Decode a raw payload, keeping it alongside the table.
    pub fn from_payload(payload: Value) -> Result<Self> {
        let table = decode(&payload)?;
        Ok(Self { table, payload })
    }
}

/// Outputs of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// One entry per discovered output node, in output slot order.
    pub outputs: Vec<DecodedOutput>,

    pub report: ExecutionReport,
}
