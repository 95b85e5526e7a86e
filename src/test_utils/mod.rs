//! Helpers shared by the unit tests
mod common;
mod mock_engine;

pub use common::*;
pub use mock_engine::*;
