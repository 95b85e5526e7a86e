//! Blob transfer and local caching.
//!
//! [`BlobStore`] multiplexes client requests onto engine operations and owns
//! the cache directory; [`FsBlobEngine`] is the filesystem backend whose
//! transfers run as cancellable [`CopyOp`]s.

mod blob_ref;
mod engine;
mod fs_engine;
mod op;
mod store;

pub use blob_ref::*;
pub use engine::*;
pub use fs_engine::*;
pub use op::*;
pub use store::*;

#[cfg(test)]
mod fs_engine_test;
