//! Layout constants and default parameters for the disk R-Tree.

/// Length of the random per-tree pairing nonce stored in both file headers.
pub const UNIQUE_SEQUENCE_LEN: usize = 20;

/// Length of the SHA-1 digest over the layout parameters.
pub const CONFIG_HASH_LEN: usize = 20;

/// Size of the shared pairing prefix (`unique_sequence` + `config_hash`).
pub const PAIRING_PREFIX_LEN: usize = UNIQUE_SEQUENCE_LEN + CONFIG_HASH_LEN;

/// Sentinel id marking unused child slots and the root's missing parent.
pub const NULL_NODE_ID: i64 = -1;

/// Size of the leaf flag at the front of every node page.
pub const NODE_FLAG_SIZE: usize = 1;

/// Size of the live flag at the front of every record.
pub const RECORD_FLAG_SIZE: usize = 1;

/// Default number of indexed dimensions.
pub const DEFAULT_DIMENSIONS: u32 = 2;

/// Default node page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;

/// Default width of node ids and record offsets on disk, in bytes.
pub const DEFAULT_ID_SIZE: u8 = 8;

/// Default width of one coordinate on disk, in bytes.
pub const DEFAULT_COORD_SIZE: u8 = 4;

/// Default minimum-fill fraction used to bias split distribution.
pub const DEFAULT_MIN_FILL: f64 = 0.35;

/// Default byte budget for the variable cache region (8 MiB).
pub const DEFAULT_CACHE_BYTES: usize = 8 * 1024 * 1024;

/// Per-axis growth of the k-NN search box, as a fraction of the root width.
pub const KNN_GROWTH_FACTOR: f64 = 0.01;

/// Default tree file name inside the working directory.
pub const DEFAULT_TREE_FILE: &str = "rtree.bin";

/// Default record file name inside the working directory.
pub const DEFAULT_RECORD_FILE: &str = "records.bin";
