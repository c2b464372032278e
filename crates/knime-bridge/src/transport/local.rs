//! Local execution through the KNIME batch application.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::report::{DecodedOutput, Execution, ExecutionReport, ExecutionWarning};
use super::{collect_inputs, ExecuteOptions, Transport};
use crate::config::BridgeConfig;
use crate::discovery::{self, DiscoveredNodes, ServiceNode};
use crate::error::{format_captured, BridgeError, Result};
use crate::table::InputTable;

const BATCH_APPLICATION: &str = "org.knime.product.KNIME_BATCH_APPLICATION";

/// Engine output fragment reported when another instance holds the workflow lock.
const LOCKED_MARKER: &str = "locked by another";

/// Everything the engine needs for one batch run.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Absolute workflow directory.
    pub workflow_dir: PathBuf,

    /// Scratch workspace for the engine (`-data`).
    pub data_dir: PathBuf,

    /// Input file per input node id.
    pub inputs: Vec<(i64, PathBuf)>,

    /// Expected output file per output node id.
    pub outputs: Vec<(i64, PathBuf)>,

    pub reset: bool,
    pub save_after_execution: bool,
    pub capture_output: bool,
}

impl LaunchRequest {
    /// Batch application arguments.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-nosplash".to_string(),
            "-debug".to_string(),
            "--launcher.suppressErrors".to_string(),
            "-application".to_string(),
            BATCH_APPLICATION.to_string(),
            "-data".to_string(),
            self.data_dir.display().to_string(),
            format!("-workflowDir={}", self.workflow_dir.display()),
        ];

        if self.reset {
            args.push("-reset".to_string());
        }
        if !self.save_after_execution {
            args.push("-nosave".to_string());
        }

        for (node_id, path) in &self.inputs {
            args.push(format!("-option={},inputPathOrUrl,{},String", node_id, path.display()));
        }
        for (node_id, path) in &self.outputs {
            args.push(format!("-option={},outputPathOrUrl,{},String", node_id, path.display()));
        }

        args
    }
}

/// Outcome of a terminated engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRun {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl EngineRun {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    /// Set the execution duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the process exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns true if the engine refused to run because the workflow is locked.
    pub fn reports_locked(&self) -> bool {
        [&self.stdout, &self.stderr]
            .iter()
            .any(|out| out.to_ascii_lowercase().contains(LOCKED_MARKER))
    }

    fn log_captured(&self, level: tracing::Level) {
        if level == tracing::Level::ERROR {
            tracing::error!(stdout = %self.stdout, "captured stdout");
            tracing::error!(stderr = %self.stderr, "captured stderr");
        } else {
            tracing::info!(stdout = %self.stdout, "captured stdout");
            tracing::info!(stderr = %self.stderr, "captured stderr");
        }
    }
}

/// Starts the engine for a prepared batch run and waits for it to terminate.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<EngineRun>;
}

/// Launches the KNIME executable as a batch process.
#[derive(Debug, Clone)]
pub struct BatchLauncher {
    executable: PathBuf,
}

impl BatchLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl EngineLauncher for BatchLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<EngineRun> {
        if !self.executable.exists() {
            return Err(BridgeError::ExecutableNotFound(self.executable.clone()));
        }

        let start = std::time::Instant::now();
        let args = request.args();
        tracing::info!(
            executable = %self.executable.display(),
            args = ?args,
            "KNIME invocation"
        );

        let mut cmd = Command::new(&self.executable);
        cmd.args(&args);
        cmd.stdin(Stdio::null());

        // Configure output capture
        if request.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }

        let child = cmd
            .spawn()
            .map_err(|e| BridgeError::Process(format!("Failed to spawn KNIME: {}", e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BridgeError::Process(format!("Failed to wait for KNIME: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::info!(exit_code, "Exit code from KNIME execution");

        Ok(EngineRun::new(
            exit_code,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        )
        .with_duration(start.elapsed().as_millis() as u64))
    }
}

/// Runs an on-disk workflow through an [`EngineLauncher`].
pub struct LocalTransport {
    workflow_dir: PathBuf,
    launcher: Arc<dyn EngineLauncher>,
}

impl LocalTransport {
    /// Transport for the workflow in `workflow_dir`, launched with the configured executable.
    pub fn new(workflow_dir: impl Into<PathBuf>, config: &BridgeConfig) -> Self {
        Self {
            workflow_dir: absolute(workflow_dir.into()),
            launcher: Arc::new(BatchLauncher::new(config.executable_path.clone())),
        }
    }

    /// Replace the engine launcher.
    pub fn with_launcher(mut self, launcher: impl EngineLauncher + 'static) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn workflow_dir(&self) -> &Path {
        &self.workflow_dir
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("workflow_dir", &self.workflow_dir)
            .finish()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn discover(&self) -> Result<DiscoveredNodes> {
        let workflow_dir = self.workflow_dir.clone();
        tokio::task::spawn_blocking(move || discovery::discover(&workflow_dir))
            .await
            .map_err(|e| BridgeError::Process(format!("Discovery task failed: {}", e)))?
    }

    async fn execute(
        &self,
        nodes: &DiscoveredNodes,
        inputs: &[Option<InputTable>],
        options: &ExecuteOptions,
    ) -> Result<Execution> {
        if !self.workflow_dir.is_dir() {
            return Err(BridgeError::DefinitionNotFound(self.workflow_dir.clone()));
        }

        let mut report = ExecutionReport::default();
        let payloads = collect_inputs(&nodes.inputs, inputs, &mut report)?;

        // Removed when dropped, on every return path below.
        let staging = tempfile::Builder::new().prefix("knime-bridge-").tempdir()?;
        tracing::debug!(temp_dir = %staging.path().display(), "Using staging directory");

        let mut input_files = Vec::with_capacity(payloads.len());
        for (node, payload) in payloads {
            let node_id = require_node_id(node)?;
            let path = staging.path().join(format!("input_{}.json", node_id));
            tokio::fs::write(&path, serde_json::to_vec(&payload)?).await?;
            input_files.push((node_id, path));
        }

        let output_files = nodes
            .outputs
            .iter()
            .map(|node| {
                let node_id = require_node_id(node)?;
                Ok((node_id, staging.path().join(format!("output_{}.json", node_id))))
            })
            .collect::<Result<Vec<_>>>()?;

        let request = LaunchRequest {
            workflow_dir: self.workflow_dir.clone(),
            data_dir: staging.path().join("knime_data"),
            inputs: input_files,
            outputs: output_files,
            reset: options.reset,
            save_after_execution: options.save_after_execution,
            capture_output: options.capture_output,
        };

        let run = self.launcher.launch(&request).await?;
        report.exit_code = Some(run.exit_code);
        report.duration_ms = Some(run.duration_ms);

        if run.reports_locked() {
            run.log_captured(tracing::Level::ERROR);
            return Err(BridgeError::ResourceLocked {
                stdout: run.stdout,
                stderr: run.stderr,
            });
        }

        let mut outputs = Vec::with_capacity(request.outputs.len());
        for (node_id, path) in &request.outputs {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::error!(node_id, path = %path.display(), "Output from KNIME not found");
                    run.log_captured(tracing::Level::ERROR);
                    return Err(BridgeError::ExecutionOutputMissing {
                        path: path.clone(),
                        exit_code: run.exit_code,
                        stdout: run.stdout,
                        stderr: run.stderr,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            let decoded = serde_json::from_slice::<Value>(&bytes)
                .map_err(BridgeError::from)
                .and_then(DecodedOutput::from_payload);
            match decoded {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    tracing::error!(node_id, path = %path.display(), error = %e, "Invalid output from KNIME");
                    run.log_captured(tracing::Level::ERROR);
                    return Err(BridgeError::InvalidOutput {
                        origin: path.display().to_string(),
                        reason: e.to_string(),
                        captured: format_captured(&run.stdout, &run.stderr),
                    });
                }
            }
        }

        if !run.is_success() {
            run.log_captured(tracing::Level::INFO);
            report.warn(ExecutionWarning::NonZeroExit {
                exit_code: run.exit_code,
            });
        }

        Ok(Execution { outputs, report })
    }
}

fn require_node_id(node: &ServiceNode) -> Result<i64> {
    node.node_id.ok_or_else(|| {
        BridgeError::Configuration(format!("service node '{}' has no node id", node.label()))
    })
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LaunchRequest {
        LaunchRequest {
            workflow_dir: PathBuf::from("/work/flow"),
            data_dir: PathBuf::from("/tmp/stage/knime_data"),
            inputs: vec![(1, PathBuf::from("/tmp/stage/input_1.json"))],
            outputs: vec![(3, PathBuf::from("/tmp/stage/output_3.json"))],
            reset: false,
            save_after_execution: false,
            capture_output: true,
        }
    }

    #[test]
    fn test_launch_args() {
        let args = request().args();
        assert_eq!(&args[..5], &[
            "-nosplash",
            "-debug",
            "--launcher.suppressErrors",
            "-application",
            "org.knime.product.KNIME_BATCH_APPLICATION",
        ]);
        assert!(args.contains(&"-workflowDir=/work/flow".to_string()));
        assert!(args.contains(&"-nosave".to_string()));
        assert!(!args.contains(&"-reset".to_string()));
        assert!(args.contains(&"-option=1,inputPathOrUrl,/tmp/stage/input_1.json,String".to_string()));
        assert!(args.contains(&"-option=3,outputPathOrUrl,/tmp/stage/output_3.json,String".to_string()));
    }

    #[test]
    fn test_launch_args_reset_and_save() {
        let mut req = request();
        req.reset = true;
        req.save_after_execution = true;
        let args = req.args();
        assert!(args.contains(&"-reset".to_string()));
        assert!(!args.contains(&"-nosave".to_string()));
    }

    #[test]
    fn test_engine_run_lock_detection() {
        let run = EngineRun::new(4, "", "ERROR: Workflow is locked by another KNIME instance");
        assert!(run.reports_locked());
        assert!(!run.is_success());
        assert!(!EngineRun::new(0, "done", "").reports_locked());
    }

    #[tokio::test]
    async fn test_batch_launcher_missing_executable() {
        let launcher = BatchLauncher::new("/definitely/not/knime");
        let result = launcher.launch(&request()).await;
        assert!(matches!(result, Err(BridgeError::ExecutableNotFound(_))));
    }

    #[tokio::test]
    async fn test_execute_missing_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path().join("never_gonna_let_you_down"), &BridgeConfig::default());
        let result = transport
            .execute(&DiscoveredNodes::default(), &[], &ExecuteOptions::default())
            .await;
        assert!(matches!(result, Err(BridgeError::DefinitionNotFound(_))));
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(absolute(PathBuf::from("/a/b")), PathBuf::from("/a/b"));
        assert!(absolute(PathBuf::from("relative/flow")).is_absolute());
    }
}
