//! Core types for the disk R-Tree: errors, id aliases, records, statistics.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced by the index and its two backing files.
///
/// The engine recovers nothing internally: every failure bubbles to the API
/// boundary, where only a top-level point-search miss maps to a clean `None`.
#[derive(Debug, Error)]
pub enum RTreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("expected {expected} coordinates, got {actual}")]
    DimMismatch { expected: usize, actual: usize },

    #[error("node capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("corrupt tree file: {0}")]
    CorruptTree(String),

    #[error("tree and record files are not a compatible pair: {0}")]
    IncompatibleFiles(String),

    #[error("node {0} not found in tree file")]
    NodeNotFound(NodeId),

    #[error("record offset {0} outside the record file")]
    RecordNotFound(RecordOffset),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("index is closed")]
    Closed,
}

/// Result type for index operations.
pub type RTreeResult<T> = Result<T, RTreeError>;

/// Id of a node slot in the tree file. Signed; `-1` is the null sentinel.
pub type NodeId = i64;

/// Byte position of a record's live flag in the record file.
///
/// The offset is assigned once on append and never changes, so it doubles
/// as the record's permanent identity.
pub type RecordOffset = i64;

// ============================================================================
// Records
// ============================================================================

/// One stored entry: a live flag, its point, and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub live: bool,
    pub coordinates: Vec<i64>,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(coordinates: Vec<i64>, payload: Vec<u8>) -> Record {
        Record {
            live: true,
            coordinates,
            payload,
        }
    }

    /// Euclidean distance from this record's point to `target`.
    pub fn distance_to(&self, target: &[i64]) -> f64 {
        let sum: f64 = self
            .coordinates
            .iter()
            .zip(target.iter())
            .map(|(&a, &b)| {
                let diff = a as f64 - b as f64;
                diff * diff
            })
            .sum();
        sum.sqrt()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters describing the index since it was opened.
#[derive(Debug, Clone, Default)]
pub struct RTreeStats {
    /// Number of splits between the root and the leaves.
    pub tree_depth: u32,
    /// Highest node id allocated so far, or -1 for a header-only file.
    pub highest_node_id: NodeId,
    pub nodes_read: u64,
    pub nodes_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
