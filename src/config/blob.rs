use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlobConfig {
    /// Root of the central blob store (filesystem engine)
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Local cache directory, bucketed by blob id
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Delay before a `blob.cleanup` request without explicit delay sweeps
    #[serde(default)]
    pub cleanup_delay_ms: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            cache_dir: default_cache_dir(),
            cleanup_delay_ms: 0,
        }
    }
}

impl BlobConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.store_dir, "store_dir")?;
        validate_directory(&self.cache_dir, "cache_dir")?;
        if self.store_dir == self.cache_dir {
            return Err(Error::InvalidConfig(
                "store_dir and cache_dir must be different directories".into(),
            ));
        }
        Ok(())
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("_blobs")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("_blobcache")
}
