//! Service node discovery.
//!
//! A workflow directory holds one `workflow.knime` node registry plus one
//! `<node dir>/settings.xml` per node. Container Input (Table) and Container
//! Output (Table) nodes are recognized by the factory named in their settings;
//! their numeric ids come from the registry entry that points at their
//! settings file.

use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Factory marker of Container Input (Table) nodes.
pub const INPUT_FACTORY_MARKER: &str = "ContainerTableInputNodeFactory";

/// Factory marker of Container Output (Table) nodes.
pub const OUTPUT_FACTORY_MARKER: &str = "ContainerTableOutputNodeFactory";

/// Node registry document inside a workflow directory.
pub const REGISTRY_FILE: &str = "workflow.knime";

/// Per-node settings document.
pub const SETTINGS_FILE: &str = "settings.xml";

const PARAMETER_NAME_KEY: &str = "parameterName";

/// Direction of a service node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Input,
    Output,
}

/// A Container Input/Output (Table) node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceNode {
    pub role: NodeRole,

    /// Unique directory name, e.g. `Container Input _Table_ (#42)`.
    /// For nodes known only through a remote job this is the parameter key.
    pub directory_name: String,

    /// Numeric node id. Always set for nodes read from an on-disk workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<i64>,

    /// Declared parameter name (inputs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
}

impl ServiceNode {
    /// Human-readable identification used in logs and warnings.
    pub fn label(&self) -> &str {
        self.parameter_name.as_deref().unwrap_or(&self.directory_name)
    }
}

/// Service nodes in discovery order; positions define slot indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveredNodes {
    pub inputs: Vec<ServiceNode>,
    pub outputs: Vec<ServiceNode>,
}

/// Discover the service table nodes of the workflow in `workflow_dir`.
pub fn discover(workflow_dir: &Path) -> Result<DiscoveredNodes> {
    let (input_dirnames, output_dirnames) = find_service_table_node_dirnames(workflow_dir)?;

    let registry_xml = read_definition(&workflow_dir.join(REGISTRY_FILE))?;
    let registry = Document::parse(&registry_xml)?;
    let nodes = registry_nodes(&registry)?;

    let mut discovered = DiscoveredNodes::default();

    for dirname in input_dirnames {
        let node_id = lookup_node_id(nodes, &dirname)?;
        let parameter_name = find_parameter_name(workflow_dir, &dirname)?;
        tracing::debug!(node_id, directory = %dirname, parameter = ?parameter_name, "Found input service node");
        discovered.inputs.push(ServiceNode {
            role: NodeRole::Input,
            directory_name: dirname,
            node_id: Some(node_id),
            parameter_name,
        });
    }

    for dirname in output_dirnames {
        let node_id = lookup_node_id(nodes, &dirname)?;
        tracing::debug!(node_id, directory = %dirname, "Found output service node");
        discovered.outputs.push(ServiceNode {
            role: NodeRole::Output,
            directory_name: dirname,
            node_id: Some(node_id),
            parameter_name: None,
        });
    }

    Ok(discovered)
}

/// Directory names of the Container Input (Table) and Container Output (Table)
/// nodes, sorted by name.
pub fn find_service_table_node_dirnames(workflow_dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
    if !workflow_dir.is_dir() {
        return Err(BridgeError::DefinitionNotFound(workflow_dir.to_path_buf()));
    }

    let mut node_dirs: Vec<(String, PathBuf)> = std::fs::read_dir(workflow_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let settings = entry.path().join(SETTINGS_FILE);
            let name = entry.file_name().into_string().ok()?;
            settings.is_file().then_some((name, settings))
        })
        .collect();
    node_dirs.sort();

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for (dirname, settings) in node_dirs {
        let contents = read_definition(&settings)?;
        match classify(&contents) {
            Some(NodeRole::Input) => inputs.push(dirname),
            Some(NodeRole::Output) => outputs.push(dirname),
            None => {}
        }
    }

    Ok((inputs, outputs))
}

/// Numeric id of the node stored in `dirname`.
pub fn find_node_id(workflow_dir: &Path, dirname: &str) -> Result<i64> {
    let registry_xml = read_definition(&workflow_dir.join(REGISTRY_FILE))?;
    let registry = Document::parse(&registry_xml)?;
    lookup_node_id(registry_nodes(&registry)?, dirname)
}

/// Declared parameter name of the input node stored in `dirname`, if any.
pub fn find_parameter_name(workflow_dir: &Path, dirname: &str) -> Result<Option<String>> {
    let settings_xml = read_definition(&workflow_dir.join(dirname).join(SETTINGS_FILE))?;
    let settings = Document::parse(&settings_xml)?;
    Ok(settings
        .descendants()
        .find(|n| n.is_element() && n.attribute("key") == Some(PARAMETER_NAME_KEY))
        .and_then(|n| n.attribute("value"))
        .map(str::to_string))
}

fn read_definition(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BridgeError::DefinitionNotFound(path.to_path_buf()),
        _ => BridgeError::Io(format!("{}: {}", path.display(), e)),
    })
}

/// Role named by the first factory marker appearing in a settings document.
fn classify(settings: &str) -> Option<NodeRole> {
    let input = settings.find(INPUT_FACTORY_MARKER);
    let output = settings.find(OUTPUT_FACTORY_MARKER);
    match (input, output) {
        (Some(i), Some(o)) if o < i => Some(NodeRole::Output),
        (Some(_), _) => Some(NodeRole::Input),
        (None, Some(_)) => Some(NodeRole::Output),
        (None, None) => None,
    }
}

/// The `nodes` config element of the registry. Its tag (and namespace) are
/// taken from the document rather than assumed, so registries written by
/// other KNIME versions still resolve.
fn registry_nodes<'a, 'input>(registry: &'a Document<'input>) -> Result<Node<'a, 'input>> {
    registry
        .root_element()
        .children()
        .filter(Node::is_element)
        .find(|entry| {
            entry.attribute("key") == Some("nodes") && entry.tag_name().name().ends_with("config")
        })
        .ok_or_else(|| BridgeError::NotFound("nodes config XML tag not found".to_string()))
}

fn lookup_node_id(nodes: Node<'_, '_>, dirname: &str) -> Result<i64> {
    let target = normalize_path(&format!("{}/{}", dirname, SETTINGS_FILE));
    let config_tag = nodes.tag_name();

    for node_config in nodes
        .children()
        .filter(|n| n.is_element() && n.tag_name() == config_tag)
    {
        let mut node_id = None;
        let mut matched = false;
        for entry in node_config.children().filter(Node::is_element) {
            let value = entry.attribute("value");
            if entry.attribute("key") == Some("id") {
                node_id = value;
            }
            if value.map(normalize_path).as_deref() == Some(target.as_str()) {
                matched = true;
            }
        }

        if matched {
            let raw = node_id.ok_or_else(|| {
                BridgeError::NotFound(format!("node registered for '{}' has no id", target))
            })?;
            return raw.trim().parse::<i64>().map_err(|_| {
                BridgeError::NotFound(format!("node id '{}' for '{}' is not an integer", raw, target))
            });
        }
    }

    Err(BridgeError::NotFound(format!("no node registered for '{}'", target)))
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NS: &str = r#"xmlns="http://www.knime.org/2008/09/XMLConfig""#;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn settings(factory: &str, parameter: Option<&str>) -> String {
        let model = parameter
            .map(|p| format!(r#"<config key="model"><entry key="parameterName" type="xstring" value="{}"/></config>"#, p))
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<config {} key="settings.xml">
<entry key="node_file" type="xstring" value="settings.xml"/>
<entry key="factory" type="xstring" value="{}"/>
{}
</config>"#,
            NS, factory, model
        )
    }

    fn registry(entries: &[(i64, &str)]) -> String {
        let nodes: String = entries
            .iter()
            .map(|(id, path)| {
                format!(
                    r#"<config key="node_{id}"><entry key="id" type="xint" value="{id}"/><entry key="node_settings_file" type="xstring" value="{path}"/></config>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<config {} key="workflow.knime">
<entry key="created_by" type="xstring" value="3.6.0"/>
<config key="nodes">{}</config>
<config key="connections"/>
</config>"#,
            NS, nodes
        )
    }

    fn simple_workflow() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Container Input _Table_ (#1)/settings.xml",
            &settings("org.knime.json.node.container.input.table.ContainerTableInputNodeFactory", Some("input")),
        );
        write(
            dir.path(),
            "Math Formula (#2)/settings.xml",
            &settings("org.knime.ext.jep.JEPNodeFactory", None),
        );
        write(
            dir.path(),
            "Container Output _Table_ (#3)/settings.xml",
            &settings("org.knime.json.node.container.output.table.ContainerTableOutputNodeFactory", None),
        );
        write(
            dir.path(),
            REGISTRY_FILE,
            &registry(&[
                (1, "Container Input _Table_ (#1)/settings.xml"),
                (2, "Math Formula (#2)/settings.xml"),
                (3, r"Container Output _Table_ (#3)\settings.xml"),
            ]),
        );
        dir
    }

    #[test]
    fn test_discover_one_input_one_output() {
        let dir = simple_workflow();
        let nodes = discover(dir.path()).unwrap();

        assert_eq!(nodes.inputs.len(), 1);
        assert_eq!(nodes.outputs.len(), 1);
        assert_eq!(nodes.inputs[0].directory_name, "Container Input _Table_ (#1)");
        assert_eq!(nodes.inputs[0].node_id, Some(1));
        assert_eq!(nodes.inputs[0].parameter_name.as_deref(), Some("input"));
        assert_eq!(nodes.outputs[0].node_id, Some(3));
        assert_eq!(nodes.outputs[0].role, NodeRole::Output);
    }

    #[test]
    fn test_find_node_id_is_separator_neutral() {
        let dir = simple_workflow();
        assert_eq!(find_node_id(dir.path(), "Container Output _Table_ (#3)").unwrap(), 3);
        assert_eq!(find_node_id(dir.path(), "Math Formula (#2)").unwrap(), 2);
        assert!(matches!(
            find_node_id(dir.path(), "Nope (#9)"),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_parameter_name() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Container Input _Table_ (#4)/settings.xml",
            &settings(INPUT_FACTORY_MARKER, None),
        );
        write(dir.path(), REGISTRY_FILE, &registry(&[(4, "Container Input _Table_ (#4)/settings.xml")]));

        let nodes = discover(dir.path()).unwrap();
        assert_eq!(nodes.inputs[0].parameter_name, None);
        assert_eq!(nodes.inputs[0].label(), "Container Input _Table_ (#4)");
    }

    #[test]
    fn test_registry_without_nodes_element() {
        let dir = simple_workflow();
        write(
            dir.path(),
            REGISTRY_FILE,
            &format!(r#"<config {} key="workflow.knime"><config key="connections"/></config>"#, NS),
        );
        assert!(matches!(discover(dir.path()), Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn test_registry_tag_is_inferred() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Container Output _Table_ (#7)/settings.xml",
            &settings(OUTPUT_FACTORY_MARKER, None),
        );
        write(
            dir.path(),
            REGISTRY_FILE,
            r#"<k:config xmlns:k="http://www.knime.org/2099/XMLConfig" key="workflow.knime">
<k:config key="nodes"><k:config key="node_7"><k:entry key="id" value="7"/><k:entry key="node_settings_file" value="Container Output _Table_ (#7)/settings.xml"/></k:config></k:config>
</k:config>"#,
        );
        assert_eq!(discover(dir.path()).unwrap().outputs[0].node_id, Some(7));
    }

    #[test]
    fn test_missing_workflow() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("never_gonna_give_you_up");
        assert!(matches!(discover(&missing), Err(BridgeError::DefinitionNotFound(_))));

        // Directory present but no registry.
        assert!(matches!(discover(dir.path()), Err(BridgeError::DefinitionNotFound(_))));
    }

    #[test]
    fn test_malformed_registry() {
        let dir = simple_workflow();
        write(dir.path(), REGISTRY_FILE, "<config key=");
        assert!(matches!(discover(dir.path()), Err(BridgeError::InvalidDefinition(_))));
    }

    #[test]
    fn test_classify_first_marker_wins() {
        assert_eq!(classify(INPUT_FACTORY_MARKER), Some(NodeRole::Input));
        assert_eq!(
            classify(&format!("{} {}", OUTPUT_FACTORY_MARKER, INPUT_FACTORY_MARKER)),
            Some(NodeRole::Output)
        );
        assert_eq!(classify("org.knime.base.node.io.csvreader"), None);
    }
}
