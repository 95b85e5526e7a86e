use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::NodeId;
use crate::Result;

/// Node identity parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Unique node identifier in the cluster
    ///
    /// Default: `default_node_id()` ("n1", single-node setup)
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,

    /// Log files output directory
    ///
    /// Default: `default_log_dir()` (./logs)
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            log_dir: default_log_dir(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::InvalidConfig("node_id cannot be empty".into()));
        }
        validate_directory(&self.log_dir, "log_dir")
    }
}

fn default_node_id() -> NodeId {
    "n1".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
