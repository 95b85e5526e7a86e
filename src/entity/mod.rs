//! Revisioned document store with partition range queries.

mod engine;
mod sled_engine;
mod store;
mod types;

pub use engine::*;
pub use sled_engine::*;
pub use store::*;
pub use types::*;
