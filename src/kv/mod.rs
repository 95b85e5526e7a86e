//! Distributed key/value watch-and-publish keyed to partition ownership.

mod key_watcher;
mod store;
mod types;

pub use key_watcher::*;
pub use store::*;
pub use types::*;
