//! Cluster-facing types: membership snapshots, the message envelope with its
//! typed key/value payloads, and the connector seam to the transport.

mod connector;
mod message;
mod types;

pub use connector::*;
pub use message::*;
pub use types::*;
