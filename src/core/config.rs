//! Configuration loading
//!
//! A project keeps its settings in `.loom/config.yaml`. When the project has
//! no config file, a user-level `config.yaml` under the platform config
//! directory is used instead; with neither present the defaults apply.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::project::Project;
use crate::core::store::StoreOptions;
use crate::core::timeline::StepGraph;
use crate::entities::request::RequestType;
use crate::entities::timeline::steps;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    #[diagnostic(code(loom::config::io))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    #[diagnostic(code(loom::config::parse), help("check the YAML against `loom init` defaults"))]
    Parse {
        path: PathBuf,
        source: serde_yml::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yml::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workflow: WorkflowSettings,
    pub store: StoreSettings,
    pub notifications: NotificationSettings,
}

/// Rules the workflow engine applies on top of the status machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Bin (id or code) that washed garments are placed in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wash_staging_bin: Option<String>,

    /// Require a batched CUTTING fan-out to match the batch quantity
    pub strict_quantity_reconciliation: bool,

    /// Most SEW requests a single CUTTING may fan out into
    pub max_fan_out_units: u32,

    /// Require a QR scan when completing a MOVE
    pub require_scan_on_move: bool,

    /// Named-step graphs per request type
    pub step_graphs: BTreeMap<RequestType, StepGraph>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let mut step_graphs = BTreeMap::new();
        step_graphs.insert(RequestType::Cutting, default_cutting_graph());
        Self {
            wash_staging_bin: None,
            strict_quantity_reconciliation: true,
            max_fan_out_units: DEFAULT_MAX_FAN_OUT_UNITS,
            require_scan_on_move: true,
            step_graphs,
        }
    }
}

pub const DEFAULT_MAX_FAN_OUT_UNITS: u32 = 10_000;

/// Cutting may be reassigned and started once before it finishes
fn default_cutting_graph() -> StepGraph {
    let open = |next: &[&str]| next.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut graph = StepGraph::new();
    graph.insert(
        steps::CREATED.to_string(),
        open(&[steps::ASSIGNED, steps::STARTED, steps::COMPLETED, steps::FAILED]),
    );
    graph.insert(
        steps::ASSIGNED.to_string(),
        open(&[steps::ASSIGNED, steps::STARTED, steps::COMPLETED, steps::FAILED]),
    );
    graph.insert(
        steps::STARTED.to_string(),
        open(&[steps::ASSIGNED, steps::COMPLETED, steps::FAILED]),
    );
    graph
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Milliseconds a writer waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreSettings {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Hand queued notifications to the dispatcher after commit
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load the project config, falling back to the user config
    pub fn load(project: &Project) -> Result<Self, ConfigError> {
        let project_config = project.config_path();
        if project_config.exists() {
            return Self::from_file(&project_config);
        }
        match Self::user_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yml::to_string(self)?)
    }

    /// `<config dir>/loom/config.yaml` on this platform
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "loom").map(|dirs| dirs.config_dir().join("config.yaml"))
    }
}
