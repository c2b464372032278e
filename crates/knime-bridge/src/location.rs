//! Where a workflow lives: a local directory or a path on a KNIME Server.

use reqwest::Url;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

const WEBPORTAL_SEPARATOR: &str = "/#/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowLocation {
    /// Workflow directory on the local filesystem.
    Local(PathBuf),
    /// Workflow in a KNIME Server repository.
    Remote {
        /// Server root, e.g. `https://knime.example.com/knime`.
        server_url: String,
        /// Repository path with a leading slash, e.g. `/Users/me/my_workflow`.
        workflow_path: String,
    },
}

impl WorkflowLocation {
    /// Interpret a local path, a server URL (`http://`, `https://`, `knime://`),
    /// or a WebPortal URL of the form `<server>/#/<workflow path>`.
    pub fn parse(path_or_url: &str) -> Result<Self> {
        if let Some(rest) = path_or_url.strip_prefix("knime://") {
            let (host, path) = rest.split_once('/').ok_or_else(|| {
                BridgeError::Configuration(format!("no workflow path in '{}'", path_or_url))
            })?;
            return remote(&format!("https://{}", host), path);
        }

        if !is_http_url(path_or_url) {
            return Ok(WorkflowLocation::Local(PathBuf::from(path_or_url)));
        }

        if let Some((server, path)) = path_or_url.split_once(WEBPORTAL_SEPARATOR) {
            return remote(server, path);
        }

        let url = Url::parse(path_or_url)
            .map_err(|e| BridgeError::Configuration(format!("invalid URL '{}': {}", path_or_url, e)))?;
        remote(&url.origin().ascii_serialization(), url.path())
    }

    /// Combine a workspace (directory or server root) with a workflow path
    /// inside it. A leading `/` on the workflow path is ignored.
    pub fn join(workspace: &str, workflow_path: &str) -> Result<Self> {
        if is_http_url(workspace) {
            remote(workspace, workflow_path)
        } else {
            Ok(WorkflowLocation::Local(
                Path::new(workspace).join(workflow_path.trim_start_matches('/')),
            ))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, WorkflowLocation::Remote { .. })
    }
}

impl std::fmt::Display for WorkflowLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowLocation::Local(path) => write!(f, "{}", path.display()),
            WorkflowLocation::Remote {
                server_url,
                workflow_path,
            } => write!(f, "{}{}{}", server_url, WEBPORTAL_SEPARATOR, workflow_path.trim_start_matches('/')),
        }
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn remote(server: &str, path: &str) -> Result<WorkflowLocation> {
    let server_url = server.trim_end_matches('/');
    Url::parse(server_url)
        .map_err(|e| BridgeError::Configuration(format!("invalid server URL '{}': {}", server_url, e)))?;

    let path = path.trim_matches('/');
    if path.is_empty() {
        return Err(BridgeError::Configuration(format!(
            "no workflow path given for server '{}'",
            server_url
        )));
    }

    Ok(WorkflowLocation::Remote {
        server_url: server_url.to_string(),
        workflow_path: format!("/{}", path),
    })
}
