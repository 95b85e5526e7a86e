// -
// Partitioning

/// Number of hash buckets shared by entities and key/value pairs.
/// Must stay a power of two: `partition_of` masks instead of dividing.
pub const PARTITIONS: u32 = 4096;

// -
// Blob cache layout

/// Number of leading blob id characters used as the bucket directory
pub(crate) const BUCKET_PREFIX_LEN: usize = 2;

/// Separator that keeps bucket dirs and cache files apart from marker names
pub(crate) const BUCKET_MARK: char = '#';

/// Zero-byte sibling of a cache file written once the download is complete
pub(crate) const READY_SUFFIX: &str = ".ready";

// -
// Cluster messaging

/// Namespace of the key/value cluster messages
pub(crate) const KV_EVENT_PREFIX: &str = "cubes.kv.";

// -
// Entity store

/// Suffix of the sled tree holding the partition index of an entity type
pub(crate) const PARTITION_INDEX_SUFFIX: &str = ".part";

/// Alphabet for generated blob ids and revisions
pub(crate) const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];
