//! # rtree-store — disk-backed spatial indexing over integer points
//!
//! This crate implements an R-Tree spatial index that lives on disk,
//! together with the record store holding the payloads the index points at.
//!
//! ## Features
//!
//! - **Paged storage**: fixed-size node slots, one disk read per node
//! - **Paired files**: tree and record files cross-checked by a shared
//!   random nonce and a hash of the layout parameters
//! - **Persistent**: indexes survive process restarts byte-for-byte
//! - **Point, window and k-NN queries** over N-dimensional signed integers
//! - **Logical deletion**: tombstones now, space reclaimed at rebuild
//! - **Two-tier node cache**: the root level is pinned, the rest is a
//!   direct-mapped region under a byte budget
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtree_store::{RTree, RTreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = RTree::open(RTreeConfig::new("saved_data"))?;
//!
//! tree.insert(&[1, 4], b"first")?;
//! tree.insert(&[-2, 0], b"second")?;
//!
//! let hit = tree.search_point(&[1, 4])?;
//! let in_window = tree.search_window(&[-5, -5], &[5, 5])?;
//! let nearest = tree.search_knn(1, &[0, 0])?;
//!
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod mbr;
pub mod rtree;

pub use config::RTreeConfig;
pub use mbr::{Mbr, MbrDim};
pub use rtree::{
    NodeId, RTree, RTreeError, RTreeNode, RTreeResult, RTreeStats, Record, RecordOffset,
};
