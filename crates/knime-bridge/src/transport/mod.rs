//! Workflow execution transports.
//!
//! Both transports share the [`Transport`] contract:
//! - `local` - KNIME batch application with per-node JSON staging files
//! - `remote` - KNIME Server REST job API

mod local;
mod remote;
mod report;

pub use self::local::{BatchLauncher, EngineLauncher, EngineRun, LaunchRequest, LocalTransport};
pub use self::remote::RemoteTransport;
pub use self::report::{DecodedOutput, Execution, ExecutionReport, ExecutionWarning};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::discovery::{DiscoveredNodes, ServiceNode};
use crate::error::{BridgeError, Result};
use crate::table::InputTable;

/// Per-execution settings.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Reset the workflow before executing.
    pub reset: bool,

    /// Job timeout forwarded to the server (remote only). `None` uses the
    /// configured default. Local executions have no timeout.
    pub timeout: Option<Duration>,

    /// Save the workflow after a local batch execution.
    pub save_after_execution: bool,

    /// Capture engine stdout/stderr (default: true). When false they pass
    /// through to this process.
    pub capture_output: bool,
}

impl ExecuteOptions {
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_save_after_execution(mut self, save: bool) -> Self {
        self.save_after_execution = save;
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            reset: false,
            timeout: None,
            save_after_execution: false,
            capture_output: true,
        }
    }
}

/// A way of discovering and running a workflow.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g., "local", "remote").
    fn kind(&self) -> &'static str;

    /// Discover the workflow's service nodes.
    async fn discover(&self) -> Result<DiscoveredNodes>;

    /// Run the workflow with one (possibly unset) value per input node.
    ///
    /// Either returns every output or fails without partial results.
    async fn execute(
        &self,
        nodes: &DiscoveredNodes,
        inputs: &[Option<InputTable>],
        options: &ExecuteOptions,
    ) -> Result<Execution>;
}

/// Encode every set input, recording a warning for each unset one.
pub(crate) fn collect_inputs<'a>(
    nodes: &'a [ServiceNode],
    inputs: &[Option<InputTable>],
    report: &mut ExecutionReport,
) -> Result<Vec<(&'a ServiceNode, Value)>> {
    if nodes.len() != inputs.len() {
        return Err(BridgeError::Configuration(format!(
            "{} input values supplied for {} input nodes",
            inputs.len(),
            nodes.len()
        )));
    }

    let mut payloads = Vec::with_capacity(nodes.len());
    for (position, (node, input)) in nodes.iter().zip(inputs).enumerate() {
        match input {
            Some(input) => payloads.push((node, input.to_payload())),
            None => report.warn(ExecutionWarning::UnsetInput {
                position,
                node: node.label().to_string(),
            }),
        }
    }
    Ok(payloads)
}
