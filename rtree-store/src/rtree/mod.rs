//! Disk-based R-Tree: paged node storage, record storage, cache and engine.
//!
//! The index is two cooperating binary files. The tree file holds fixed-size
//! node pages addressed by small integer ids; the record file holds the
//! variable-length payload records the leaves point at. A 20-byte random
//! nonce plus a hash of the layout parameters pairs the two files, so a
//! mismatched pair is rejected before any query runs.

pub mod cache;
pub mod constants;
pub mod node;
pub mod record_file;
pub mod rtree_impl;
pub mod tree_file;
pub mod types;

pub use cache::NodeCache;
pub use node::RTreeNode;
pub use record_file::RecordFile;
pub use rtree_impl::RTree;
pub use tree_file::TreeFile;
pub use types::{NodeId, RTreeError, RTreeResult, RTreeStats, Record, RecordOffset};
