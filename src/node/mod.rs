mod builder;
mod node;
mod op_tracker;
mod request;

pub use builder::*;
pub use node::*;
pub use op_tracker::*;
pub use request::*;
