//! KNIME Bridge
//!
//! Reads and executes KNIME workflows, exchanging tables with their
//! Container Input (Table) and Container Output (Table) nodes.
//!
//! This crate provides:
//! - Service node discovery from on-disk workflow definitions
//! - Table encoding to and from the `{table-spec, table-data}` wire format
//! - Local execution through the KNIME batch application
//! - Remote execution through the KNIME Server REST job API
//! - A workflow handle with positional input/output slots

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod location;
pub mod table;
pub mod transport;
pub mod workflow;

pub use config::BridgeConfig;
pub use discovery::{DiscoveredNodes, NodeRole, ServiceNode};
pub use error::{BridgeError, Result};
pub use location::WorkflowLocation;
pub use table::{Cell, Column, EngineType, InputTable, Table};
pub use transport::{DecodedOutput, ExecuteOptions, ExecutionReport, ExecutionWarning, Transport};
pub use workflow::{Workflow, WorkflowState};
