//! In-memory representation of one tree node.
//!
//! Leaves and internal nodes share this single concrete type: the leaf flag
//! decides whether `children` holds record offsets or node ids. The flag
//! costs one byte on disk and keeps the page codec uniform.

use crate::mbr::{Mbr, MbrDim};
use crate::rtree::constants::NULL_NODE_ID;
use crate::rtree::types::{NodeId, RTreeError, RTreeResult};

/// One node of the R-Tree.
///
/// `id` is `None` until the node is first persisted; the paged store assigns
/// the slot number, which then stays stable for the node's lifetime.
/// `parent_id` is a relation used by upward propagation, not ownership — the
/// tree owns every node uniformly through its id space.
#[derive(Debug, Clone, PartialEq)]
pub struct RTreeNode {
    pub id: Option<NodeId>,
    pub parent_id: NodeId,
    pub is_leaf: bool,
    pub mbr: Mbr,
    pub children: Vec<i64>,
}

impl RTreeNode {
    /// Builds a node, rejecting child lists beyond the tree's fan-out.
    pub fn new(
        mbr: Mbr,
        id: Option<NodeId>,
        parent_id: NodeId,
        children: Vec<i64>,
        is_leaf: bool,
        max_children: usize,
    ) -> RTreeResult<RTreeNode> {
        if children.len() > max_children {
            return Err(RTreeError::CapacityExceeded(format!(
                "node cannot hold {} children, maximum is {}",
                children.len(),
                max_children
            )));
        }
        Ok(RTreeNode {
            id,
            parent_id,
            is_leaf,
            mbr,
            children,
        })
    }

    /// An empty node with a zero-point placeholder MBR.
    ///
    /// The placeholder never leaks into query results: the first
    /// `insert_child` replaces it with the child's box.
    pub fn new_empty(dimensions: u32, is_leaf: bool, parent_id: NodeId) -> RTreeNode {
        RTreeNode {
            id: None,
            parent_id,
            is_leaf,
            mbr: Mbr::new((0..dimensions).map(|_| MbrDim::new(0, 0)).collect()),
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == NULL_NODE_ID
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_full(&self, max_children: usize) -> bool {
        self.children.len() >= max_children
    }

    /// Whether the node already holds at least `(1 - min_fill) * M` entries.
    /// An over-balanced split seed stops accepting entries so the other
    /// seed cannot end up short.
    pub fn has_over_balance(&self, max_children: usize, min_fill: f64) -> bool {
        self.children.len() as f64 >= (1.0 - min_fill) * max_children as f64
    }

    /// Appends a child reference and widens the MBR to cover its box.
    pub fn insert_child(
        &mut self,
        child: i64,
        child_box: &Mbr,
        max_children: usize,
    ) -> RTreeResult<()> {
        if self.is_full(max_children) {
            return Err(RTreeError::CapacityExceeded(format!(
                "node {:?} is full ({} children)",
                self.id, max_children
            )));
        }
        self.push_child(child, child_box);
        Ok(())
    }

    /// Appends without the capacity guard. Only split handling may use this,
    /// on working copies that are about to be distributed into two nodes.
    pub(crate) fn push_child(&mut self, child: i64, child_box: &Mbr) {
        if self.children.is_empty() {
            // exact union of children, not union with the placeholder
            self.mbr = child_box.clone();
        } else {
            self.mbr.enlarge(child_box);
        }
        self.children.push(child);
    }

    /// The two empty split seeds: one pinned at the low corner of this
    /// node's MBR, one at the high corner. Both inherit the leaf flag and
    /// parent so they can stand in for the node being split.
    pub fn seed_split_pair(&self) -> (RTreeNode, RTreeNode) {
        let low_seed = Mbr::new(
            self.mbr
                .dims()
                .iter()
                .map(|dim| MbrDim::new(dim.low, dim.low))
                .collect(),
        );
        let high_seed = Mbr::new(
            self.mbr
                .dims()
                .iter()
                .map(|dim| MbrDim::new(dim.high, dim.high))
                .collect(),
        );

        (
            RTreeNode {
                id: None,
                parent_id: self.parent_id,
                is_leaf: self.is_leaf,
                mbr: low_seed,
                children: Vec::new(),
            },
            RTreeNode {
                id: None,
                parent_id: self.parent_id,
                is_leaf: self.is_leaf,
                mbr: high_seed,
                children: Vec::new(),
            },
        )
    }
}
