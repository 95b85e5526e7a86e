//! A clustered data-plane node.
//!
//! Three services share one node:
//! - [`BlobStore`]: blob transfer with a local, reference-counted cache
//! - [`EntityStore`]: revisioned documents with partition range queries
//! - [`KeyWatcher`]: key/value watch-and-publish routed by partition ownership
//!
//! [`Node`] dispatches client requests onto them and fans their
//! notifications back out.

mod blob;
mod cluster;
mod config;
mod constants;
mod entity;
mod errors;
mod kv;
mod metrics;
mod node;
mod partition;
pub mod utils;

pub use blob::*;
pub use cluster::*;
pub use config::*;
pub use constants::*;
pub use entity::*;
pub use errors::*;
pub use kv::*;
pub use metrics::*;
pub use node::*;
pub use partition::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
