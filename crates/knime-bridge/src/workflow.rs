//! Workflow handle: input/output slots bound to a transport.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::config::BridgeConfig;
use crate::discovery::DiscoveredNodes;
use crate::error::{BridgeError, Result};
use crate::location::WorkflowLocation;
use crate::table::{InputTable, Table};
use crate::transport::{ExecuteOptions, ExecutionReport, LocalTransport, RemoteTransport, Transport};

/// Lifecycle of a [`Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Service nodes not yet discovered.
    Unopened,
    /// Slots sized to the discovered nodes; no successful execution yet.
    Discovered,
    /// At least one execution succeeded.
    Executed,
}

/// A KNIME workflow with one input slot per Container Input (Table) node
/// and one output slot per Container Output (Table) node.
///
/// Slots are created on first access and sized to the discovered nodes.
pub struct Workflow {
    transport: Box<dyn Transport>,
    nodes: Option<DiscoveredNodes>,
    inputs: Vec<Option<InputTable>>,
    outputs: Vec<Option<Table>>,
    payloads: Vec<Option<Value>>,
    output_names: Vec<String>,
    state: WorkflowState,
}

impl Workflow {
    /// Workflow in a local directory, executed through the batch application.
    pub fn local(workflow_dir: impl Into<PathBuf>, config: &BridgeConfig) -> Self {
        Self::with_transport(LocalTransport::new(workflow_dir, config))
    }

    /// Workflow stored on a KNIME Server.
    pub fn remote(server_url: impl Into<String>, workflow_path: impl Into<String>, config: &BridgeConfig) -> Self {
        Self::with_transport(RemoteTransport::new(server_url, workflow_path, config))
    }

    /// Open a local path or a server URL.
    pub fn open(path_or_url: &str, config: &BridgeConfig) -> Result<Self> {
        Ok(Self::from_location(WorkflowLocation::parse(path_or_url)?, config))
    }

    /// Open `workflow_path` inside a workspace directory or server root.
    ///
    /// An empty workspace selects the configured server (`KNIME_SERVER_URLROOT`).
    pub fn join(workspace: &str, workflow_path: &str, config: &BridgeConfig) -> Result<Self> {
        let workspace = match (workspace, &config.server_url) {
            ("", Some(server_url)) => server_url.as_str(),
            ("", None) => {
                return Err(BridgeError::Configuration(
                    "no workspace given and no server URL configured".to_string(),
                ))
            }
            (workspace, _) => workspace,
        };
        Ok(Self::from_location(WorkflowLocation::join(workspace, workflow_path)?, config))
    }

    pub fn from_location(location: WorkflowLocation, config: &BridgeConfig) -> Self {
        match location {
            WorkflowLocation::Local(dir) => Self::local(dir, config),
            WorkflowLocation::Remote {
                server_url,
                workflow_path,
            } => Self::remote(server_url, workflow_path, config),
        }
    }

    /// Workflow driven by a custom transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            nodes: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            payloads: Vec::new(),
            output_names: Vec::new(),
            state: WorkflowState::Unopened,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Discovered service nodes, if discovery already ran.
    pub fn nodes(&self) -> Option<&DiscoveredNodes> {
        self.nodes.as_ref()
    }

    /// Discover service nodes unless already cached.
    pub async fn discover(&mut self) -> Result<&DiscoveredNodes> {
        if self.nodes.is_none() {
            let nodes = self.transport.discover().await?;
            tracing::info!(
                transport = self.transport.kind(),
                inputs = nodes.inputs.len(),
                outputs = nodes.outputs.len(),
                "Discovered service nodes"
            );
            self.inputs = vec![None; nodes.inputs.len()];
            self.outputs = vec![None; nodes.outputs.len()];
            self.payloads = vec![None; nodes.outputs.len()];
            self.output_names = nodes.outputs.iter().map(|n| n.directory_name.clone()).collect();
            self.nodes = Some(nodes);
            self.state = WorkflowState::Discovered;
        }
        self.nodes
            .as_ref()
            .ok_or_else(|| BridgeError::Configuration("discovery produced no nodes".to_string()))
    }

    /// Input slots, one per input node in discovery order.
    pub async fn inputs(&mut self) -> Result<&[Option<InputTable>]> {
        self.discover().await?;
        Ok(&self.inputs)
    }

    /// Mutable input slots. The slice length is fixed by discovery.
    pub async fn inputs_mut(&mut self) -> Result<&mut [Option<InputTable>]> {
        self.discover().await?;
        Ok(&mut self.inputs)
    }

    /// Place a table or payload in the input slot at `position`.
    pub async fn set_input(&mut self, position: usize, input: impl Into<InputTable>) -> Result<()> {
        let slot = self.input_slot(position).await?;
        *slot = Some(input.into());
        Ok(())
    }

    /// Empty the input slot at `position`.
    pub async fn clear_input(&mut self, position: usize) -> Result<()> {
        let slot = self.input_slot(position).await?;
        *slot = None;
        Ok(())
    }

    async fn input_slot(&mut self, position: usize) -> Result<&mut Option<InputTable>> {
        self.discover().await?;
        let len = self.inputs.len();
        self.inputs
            .get_mut(position)
            .ok_or(BridgeError::SlotOutOfRange { position, len })
    }

    /// Output slots, one per output. Empty until a successful execution.
    pub async fn outputs(&mut self) -> Result<&[Option<Table>]> {
        self.discover().await?;
        Ok(&self.outputs)
    }

    /// Decoded output at `position`, if an execution produced it.
    pub async fn output(&mut self, position: usize) -> Result<Option<&Table>> {
        self.discover().await?;
        let len = self.outputs.len();
        self.outputs
            .get(position)
            .map(Option::as_ref)
            .ok_or(BridgeError::SlotOutOfRange { position, len })
    }

    /// Raw `{table-spec, table-data}` payload at `position`, exactly as the engine returned it.
    pub async fn output_payload(&mut self, position: usize) -> Result<Option<&Value>> {
        self.discover().await?;
        let len = self.payloads.len();
        self.payloads
            .get(position)
            .map(Option::as_ref)
            .ok_or(BridgeError::SlotOutOfRange { position, len })
    }

    /// Directory name of the node behind each input slot.
    pub async fn input_names(&mut self) -> Result<Vec<String>> {
        let nodes = self.discover().await?;
        Ok(nodes.inputs.iter().map(|n| n.directory_name.clone()).collect())
    }

    /// Declared parameter name of each input node, `None` where the node declares none.
    pub async fn input_parameter_names(&mut self) -> Result<Vec<Option<String>>> {
        let nodes = self.discover().await?;
        Ok(nodes.inputs.iter().map(|n| n.parameter_name.clone()).collect())
    }

    /// Name behind each output slot: node directory (local) or output key (remote).
    pub async fn output_names(&mut self) -> Result<Vec<String>> {
        self.discover().await?;
        Ok(self.output_names.clone())
    }

    /// Run the workflow with the current inputs.
    ///
    /// On success every output slot is replaced; the number of slots never
    /// changes. On failure outputs from a previous execution are kept.
    pub async fn execute(&mut self, options: &ExecuteOptions) -> Result<ExecutionReport> {
        self.discover().await?;
        let nodes = self
            .nodes
            .as_ref()
            .ok_or_else(|| BridgeError::Configuration("workflow not discovered".to_string()))?;

        tracing::info!(
            transport = self.transport.kind(),
            reset = options.reset,
            "Executing workflow"
        );
        let execution = self.transport.execute(nodes, &self.inputs, options).await?;
        if execution.outputs.len() != self.outputs.len() {
            return Err(BridgeError::Configuration(format!(
                "{} transport returned {} outputs for {} output slots",
                self.transport.kind(),
                execution.outputs.len(),
                self.outputs.len()
            )));
        }

        let (tables, payloads) = execution
            .outputs
            .into_iter()
            .map(|output| (Some(output.table), Some(output.payload)))
            .unzip();
        self.outputs = tables;
        self.payloads = payloads;
        self.state = WorkflowState::Executed;
        Ok(execution.report)
    }

    /// Drop cached discovery and every slot.
    pub fn refresh(&mut self) {
        self.nodes = None;
        self.inputs.clear();
        self.outputs.clear();
        self.payloads.clear();
        self.output_names.clear();
        self.state = WorkflowState::Unopened;
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("transport", &self.transport.kind())
            .field("state", &self.state)
            .field("nodes", &self.nodes)
            .finish()
    }
}
