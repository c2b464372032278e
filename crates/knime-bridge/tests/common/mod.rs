//! Shared fixtures: on-disk workflow definitions and a scripted engine.

#![allow(dead_code)]

use async_trait::async_trait;
use knime_bridge::transport::{EngineLauncher, EngineRun, LaunchRequest};
use knime_bridge::Result;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const INPUT_FACTORY: &str = "org.knime.json.node.container.input.table.ContainerTableInputNodeFactory";
pub const OUTPUT_FACTORY: &str = "org.knime.json.node.container.output.table.ContainerTableOutputNodeFactory";
pub const FORMULA_FACTORY: &str = "org.knime.ext.jep.JEPNodeFactory";

const NS: &str = r#"xmlns="http://www.knime.org/2008/09/XMLConfig""#;

/// Builds a workflow directory with a `workflow.knime` registry and one
/// `settings.xml` per node.
pub struct WorkflowFixture {
    dir: TempDir,
    registry: Vec<(i64, String)>,
}

impl WorkflowFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            registry: Vec::new(),
        }
    }

    pub fn input(self, id: i64, parameter: Option<&str>) -> Self {
        self.node(id, &format!("Container Input _Table_ (#{})", id), INPUT_FACTORY, parameter)
    }

    pub fn output(self, id: i64) -> Self {
        self.node(id, &format!("Container Output _Table_ (#{})", id), OUTPUT_FACTORY, None)
    }

    pub fn formula(self, id: i64) -> Self {
        self.node(id, &format!("Math Formula (#{})", id), FORMULA_FACTORY, None)
    }

    pub fn node(mut self, id: i64, dirname: &str, factory: &str, parameter: Option<&str>) -> Self {
        let model = parameter
            .map(|p| {
                format!(
                    r#"<config key="model"><entry key="parameterName" type="xstring" value="{}"/></config>"#,
                    p
                )
            })
            .unwrap_or_default();
        let settings = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<config {} key="settings.xml">
<entry key="node_file" type="xstring" value="settings.xml"/>
<entry key="factory" type="xstring" value="{}"/>
{}
</config>"#,
            NS, factory, model
        );
        write(self.dir.path(), &format!("{}/settings.xml", dirname), &settings);
        self.registry.push((id, format!("{}/settings.xml", dirname)));
        self
    }

    pub fn build(self) -> TempDir {
        let nodes: String = self
            .registry
            .iter()
            .map(|(id, path)| {
                format!(
                    r#"<config key="node_{id}"><entry key="id" type="xint" value="{id}"/><entry key="node_settings_file" type="xstring" value="{path}"/></config>"#
                )
            })
            .collect();
        let registry = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<config {} key="workflow.knime">
<entry key="created_by" type="xstring" value="3.6.0"/>
<config key="nodes">{}</config>
<config key="connections"/>
</config>"#,
            NS, nodes
        );
        write(self.dir.path(), "workflow.knime", &registry);
        self.dir
    }
}

/// Input #1 → Math Formula #2 → Output #3.
pub fn simple_workflow() -> TempDir {
    WorkflowFixture::new()
        .input(1, Some("input"))
        .formula(2)
        .output(3)
        .build()
}

/// Route crate logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// How the fake engine behaves when launched.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Append `computored = column-int * 42` to the first input and write
    /// it to every output, exiting with the given code.
    Compute(i32),
    /// Refuse to run because another instance holds the workflow.
    Locked,
    /// Exit with the given code without writing any output.
    NoOutput(i32),
    /// Write truncated JSON to every output and exit cleanly.
    Corrupt,
}

/// Engine stand-in that records every launch request.
#[derive(Clone)]
pub struct FakeEngine {
    behavior: Behavior,
    requests: Arc<Mutex<Vec<LaunchRequest>>>,
}

impl FakeEngine {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Table the Container Input node falls back to when no input is supplied.
pub fn default_input() -> Value {
    json!({"table-spec": [{"column-int": "int"}], "table-data": [[1]]})
}

fn compute(input: &Value) -> Value {
    let mut spec = input["table-spec"].as_array().cloned().unwrap_or_default();
    let idx = spec
        .iter()
        .position(|c| c.get("column-int").is_some())
        .expect("input has no column-int");
    spec.push(json!({"computored": "int"}));

    let data: Vec<Value> = input["table-data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| {
            let mut row = row.as_array().unwrap().clone();
            let value = row[idx].as_i64().unwrap();
            row.push(json!(value * 42));
            Value::Array(row)
        })
        .collect();

    json!({"table-spec": spec, "table-data": data})
}

#[async_trait]
impl EngineLauncher for FakeEngine {
    async fn launch(&self, request: &LaunchRequest) -> Result<EngineRun> {
        self.requests.lock().unwrap().push(request.clone());

        match self.behavior {
            Behavior::Locked => Ok(EngineRun::new(
                2,
                "",
                "ERROR KNIME-Worker Workflow is locked by another KNIME instance",
            )),
            Behavior::NoOutput(exit_code) => Ok(EngineRun::new(
                exit_code,
                "Loading workflow",
                "ERROR Math Formula execute failed",
            )),
            Behavior::Corrupt => {
                for (_, path) in &request.outputs {
                    std::fs::write(path, r#"{"table-spec": ["#).unwrap();
                }
                Ok(EngineRun::new(0, "WARN Container Output writer interrupted", ""))
            }
            Behavior::Compute(exit_code) => {
                let input = match request.inputs.first() {
                    Some((_, path)) => serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap(),
                    None => default_input(),
                };
                let output = serde_json::to_vec(&compute(&input)).unwrap();
                for (_, path) in &request.outputs {
                    std::fs::write(path, &output).unwrap();
                }
                Ok(EngineRun::new(exit_code, "Workflow executed successfully", ""))
            }
        }
    }
}
