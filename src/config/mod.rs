//! Configuration management for a cubes node.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod blob;
mod cluster;
mod entity;
mod kv;
mod retry;
pub use blob::*;
pub use cluster::*;
pub use entity::*;
pub use kv::*;
pub use retry::*;

use std::env;
use std::fmt::Debug;
use std::path::Path;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Prefix of the environment variables overriding file settings
const ENV_PREFIX: &str = "CUBES";

/// Main configuration container of a node
///
/// Sources are merged with increasing priority:
/// 1. Default values from code
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (`CUBES__<SECTION>__<KEY>`)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct CubesConfig {
    /// Node identity and log location
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Blob store and cache directories
    #[serde(default)]
    pub blob: BlobConfig,
    /// Key/value watcher timing
    #[serde(default)]
    pub kv: KvConfig,
    /// Entity database location
    #[serde(default)]
    pub entity: EntityConfig,
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Debug for CubesConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CubesConfig")
            .field("cluster", &self.cluster)
            .field("blob", &self.blob)
            .finish()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl CubesConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Validation is deferred so that `with_override_config()` can still be
    /// applied; callers must call `validate()` before using the result.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/node.toml");
    /// std::env::set_var("CUBES__CLUSTER__NODE_ID", "n1");
    /// let cfg = CubesConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file without validation.
    ///
    /// Environment variables are re-applied on top, so they keep the highest
    /// priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated configuration.
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.blob.validate()?;
        self.kv.validate()?;
        self.entity.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

/// Rejects empty directory settings
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidConfig(format!("{name} path cannot be empty")));
    }
    Ok(())
}
