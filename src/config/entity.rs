use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EntityConfig {
    /// Directory of the embedded entity database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl EntityConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.db_path, "db_path")
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("_entities")
}
