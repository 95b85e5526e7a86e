//! Key → partition → node routing shared by the key/value watcher and the
//! entity store.
//!
//! - [`partition_of`] buckets a key deterministically.
//! - [`PartitionMap`] answers "who owns this partition" for one cluster snapshot.
//! - [`PartitionMapper`] tracks which keyed entries were already delivered to
//!   the current owner of their partition.
//! - [`ClusterPartitioner`] is what the master uses to hand out ranges.

mod partition_map;
mod partition_mapper;
mod partitioner;

pub use partition_map::*;
pub use partition_mapper::*;
pub use partitioner::*;

#[cfg(test)]
mod partition_test;
