//! Remote execution through the KNIME Server REST job API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use super::report::{DecodedOutput, Execution, ExecutionReport, ExecutionWarning};
use super::{collect_inputs, ExecuteOptions, Transport};
use crate::auth::AuthCredentials;
use crate::config::BridgeConfig;
use crate::discovery::{DiscoveredNodes, NodeRole, ServiceNode};
use crate::error::{BridgeError, Result};
use crate::table::InputTable;

const REST_PREFIX: &str = "/rest/v4";

/// Extra time the client waits beyond the job timeout handed to the server.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(30);

/// Job description returned when a job is created.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDescription {
    id: String,

    #[serde(default)]
    input_parameters: Option<Map<String, Value>>,

    #[serde(default)]
    output_values: Option<Map<String, Value>>,
}

impl JobDescription {
    fn nodes(&self) -> DiscoveredNodes {
        let inputs = keys(&self.input_parameters)
            .map(|key| ServiceNode {
                role: NodeRole::Input,
                directory_name: key.clone(),
                node_id: None,
                parameter_name: Some(key.clone()),
            })
            .collect();
        let outputs = keys(&self.output_values)
            .map(|key| ServiceNode {
                role: NodeRole::Output,
                directory_name: key.clone(),
                node_id: None,
                parameter_name: None,
            })
            .collect();
        DiscoveredNodes { inputs, outputs }
    }
}

fn keys(map: &Option<Map<String, Value>>) -> impl Iterator<Item = &String> {
    map.iter().flat_map(|m| m.keys())
}

/// Runs a workflow stored in a KNIME Server repository.
pub struct RemoteTransport {
    client: reqwest::Client,
    server_url: String,
    workflow_path: String,
    auth: AuthCredentials,
    default_timeout: Duration,
}

impl RemoteTransport {
    /// Transport for `workflow_path` on the server rooted at `server_url`.
    pub fn new(server_url: impl Into<String>, workflow_path: impl Into<String>, config: &BridgeConfig) -> Self {
        let workflow_path = workflow_path.into();
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            workflow_path: format!("/{}", workflow_path.trim_start_matches('/')),
            auth: AuthCredentials::from_config(config),
            default_timeout: config.remote_timeout,
        }
    }

    /// Replace the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn workflow_path(&self) -> &str {
        &self.workflow_path
    }

    fn jobs_url(&self) -> String {
        format!("{}{}/repository{}:jobs", self.server_url, REST_PREFIX, self.workflow_path)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}{}/jobs/{}", self.server_url, REST_PREFIX, job_id)
    }

    async fn create_job(&self) -> Result<JobDescription> {
        let url = self.jobs_url();
        tracing::debug!(url = %url, has_auth = !self.auth.is_none(), "Creating KNIME job");

        let response = self.auth.apply_to_request(self.client.post(&url)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BridgeError::DefinitionNotFound(self.workflow_path.clone().into()));
        }
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %body, "Job creation failed");
            return Err(BridgeError::RemoteExecution {
                status: status.as_u16(),
                body,
            });
        }

        let job: JobDescription = serde_json::from_str(&body)?;
        tracing::debug!(job_id = %job.id, "Created KNIME job");
        Ok(job)
    }

    async fn delete_job(&self, job_id: &str) {
        let request = self.auth.apply_to_request(self.client.delete(self.job_url(job_id)));
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(job_id, "Deleted KNIME job");
            }
            Ok(response) => {
                tracing::warn!(job_id, status = response.status().as_u16(), "Failed to delete KNIME job");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to delete KNIME job");
            }
        }
    }

    async fn run_job(
        &self,
        job_id: &str,
        nodes: &DiscoveredNodes,
        inputs: &[Option<InputTable>],
        options: &ExecuteOptions,
    ) -> Result<Execution> {
        let start = std::time::Instant::now();
        let mut report = ExecutionReport::default();

        let body = request_body(nodes, inputs, &mut report)?;

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let query = [
            ("reset", options.reset.to_string()),
            ("timeout", timeout.as_millis().to_string()),
        ];

        let request = self
            .client
            .post(self.job_url(job_id))
            .query(&query)
            .json(&Value::Object(body))
            .timeout(timeout + CLIENT_TIMEOUT_GRACE);

        tracing::info!(job_id, reset = options.reset, timeout_ms = timeout.as_millis() as u64, "Executing KNIME job");
        let response = self.auth.apply_to_request(request).send().await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        report.status_code = Some(status);

        if !(200..300).contains(&status) {
            tracing::error!(job_id, status, body = %text, "Remote execution failed");
            return Err(BridgeError::RemoteExecution { status, body: text });
        }

        let outputs = collect_outputs(&nodes.outputs, &text, &mut report)?;
        Ok(Execution {
            outputs,
            report: report.with_duration(start.elapsed().as_millis() as u64),
        })
    }
}

/// Execution request body: each set input keyed by its parameter name.
fn request_body(
    nodes: &DiscoveredNodes,
    inputs: &[Option<InputTable>],
    report: &mut ExecutionReport,
) -> Result<Map<String, Value>> {
    let mut body = Map::new();
    for (node, payload) in collect_inputs(&nodes.inputs, inputs, report)? {
        let key = node.parameter_name.as_deref().unwrap_or(&node.directory_name);
        body.insert(key.to_string(), payload);
    }
    Ok(body)
}

/// Decode the job's `outputValues` onto the declared outputs, in declaration order.
fn collect_outputs(declared: &[ServiceNode], text: &str, report: &mut ExecutionReport) -> Result<Vec<DecodedOutput>> {
    let invalid = |origin: &str, reason: String| {
        tracing::error!(output = origin, reason = %reason, body = %text, "Invalid output from KNIME");
        BridgeError::InvalidOutput {
            origin: origin.to_string(),
            reason,
            captured: text.to_string(),
        }
    };

    let job: Value = serde_json::from_str(text).map_err(|e| invalid("response", e.to_string()))?;
    let mut values = match job.get("outputValues") {
        Some(Value::Object(values)) => values.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(invalid(
                "outputValues",
                format!("expected an object, got {}", other),
            ))
        }
    };

    let mut outputs = Vec::with_capacity(declared.len());
    for node in declared {
        let name = node.directory_name.as_str();
        let payload = values
            .remove(name)
            .ok_or_else(|| invalid(name, "declared output missing from outputValues".to_string()))?;
        outputs.push(DecodedOutput::from_payload(payload).map_err(|e| invalid(name, e.to_string()))?);
    }

    for name in values.keys() {
        report.warn(ExecutionWarning::UndeclaredOutput { name: name.clone() });
    }
    Ok(outputs)
}

impl std::fmt::Debug for RemoteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTransport")
            .field("server_url", &self.server_url)
            .field("workflow_path", &self.workflow_path)
            .field("auth", &self.auth)
            .finish()
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn discover(&self) -> Result<DiscoveredNodes> {
        let job = self.create_job().await?;
        let nodes = job.nodes();
        self.delete_job(&job.id).await;
        Ok(nodes)
    }

    async fn execute(
        &self,
        nodes: &DiscoveredNodes,
        inputs: &[Option<InputTable>],
        options: &ExecuteOptions,
    ) -> Result<Execution> {
        let job = self.create_job().await?;
        let result = self.run_job(&job.id, nodes, inputs, options).await;
        self.delete_job(&job.id).await;
        result
    }
}
