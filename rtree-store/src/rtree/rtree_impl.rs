//! The R-Tree engine: descent, splits, propagation and the query surface.
//!
//! One engine owns one tree/record file pair plus a small node cache. All
//! operations run to completion before the next begins; the engine never
//! retries or recovers internally, every failure surfaces at the API
//! boundary.

use parking_lot::RwLock;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RTreeConfig;
use crate::mbr::{Mbr, MbrDim};
use crate::rtree::cache::NodeCache;
use crate::rtree::constants::{KNN_GROWTH_FACTOR, NULL_NODE_ID, UNIQUE_SEQUENCE_LEN};
use crate::rtree::node::RTreeNode;
use crate::rtree::record_file::RecordFile;
use crate::rtree::tree_file::{read_pairing_prefix, TreeFile};
use crate::rtree::types::{NodeId, RTreeError, RTreeResult, RTreeStats, Record, RecordOffset};

/// A disk-backed R-Tree index over integer points.
pub struct RTree {
    config: RTreeConfig,
    tree: TreeFile,
    records: RecordFile,
    cache: RwLock<NodeCache>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    closed: RwLock<bool>,
}

impl RTree {
    /// Opens an index, creating the file pair when neither file exists yet.
    ///
    /// An existing pair is accepted only when the two files carry the same
    /// `(unique_sequence, config_hash)` pairing prefix and the tree header
    /// matches the layout parameters in `config`.
    pub fn open(config: RTreeConfig) -> RTreeResult<RTree> {
        config.validate()?;
        std::fs::create_dir_all(&config.working_dir)?;

        let tree_path = config.tree_path();
        let record_path = config.record_path();

        if config.override_existing {
            remove_if_exists(&tree_path)?;
            remove_if_exists(&record_path)?;
        }

        let tree_exists = tree_path.is_file();
        let record_exists = record_path.is_file();
        if tree_exists != record_exists {
            return Err(RTreeError::IncompatibleFiles(
                "only one file of the tree/record pair exists".into(),
            ));
        }

        let (tree, records) = if tree_exists {
            let (tree_sequence, tree_hash) = read_pairing_prefix(&tree_path)?;
            let (record_sequence, record_hash) = read_pairing_prefix(&record_path)?;
            if tree_sequence != record_sequence || tree_hash != record_hash {
                return Err(RTreeError::IncompatibleFiles(
                    "tree and record files were not created together".into(),
                ));
            }
            let tree = TreeFile::open(&config)?;
            let records = RecordFile::open(&config, tree.unique_sequence(), tree.config_hash())?;
            (tree, records)
        } else {
            let mut sequence = [0u8; UNIQUE_SEQUENCE_LEN];
            rand::thread_rng().fill_bytes(&mut sequence);
            let hash = config.config_hash();
            let tree = TreeFile::create(&config, sequence, hash)?;
            let records = RecordFile::create(&config, sequence, hash)?;

            let root = RTreeNode::new_empty(config.dimensions, true, NULL_NODE_ID);
            let root_id = tree.create_node(&root)?;
            tree.set_root_id(root_id)?;
            (tree, records)
        };

        let cache = NodeCache::new(tree.max_children(), config.page_size, config.cache_bytes);
        Ok(RTree {
            config,
            tree,
            records,
            cache: RwLock::new(cache),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            closed: RwLock::new(false),
        })
    }

    /// Stores `payload` under `point`. Duplicate points are allowed; each
    /// insert appends its own record.
    pub fn insert(&self, point: &[i64], payload: &[u8]) -> RTreeResult<()> {
        self.check_closed()?;
        self.check_dims(point)?;

        let record = Record::new(point.to_vec(), payload.to_vec());
        let offset = self.records.append(&record)?;

        let point_box = Mbr::point(point);
        let root = self.read_node(self.tree.root_id(), true)?;
        let mut leaf = self.choose_leaf(root, &point_box)?;
        let max_children = self.tree.max_children();

        if leaf.is_full(max_children) {
            self.handle_overflow(leaf, offset, &point_box)?;
        } else {
            leaf.insert_child(offset, &point_box, max_children)?;
            self.write_node(&leaf)?;
            self.propagate_enlargement(leaf.id.unwrap_or(NULL_NODE_ID))?;
        }
        Ok(())
    }

    /// Returns some live record stored exactly at `point`, or `None`.
    pub fn search_point(&self, point: &[i64]) -> RTreeResult<Option<Record>> {
        self.check_closed()?;
        self.check_dims(point)?;
        Ok(self.locate(point)?.map(|(record, _, _)| record))
    }

    /// Returns every live record inside the closed window spanned by the
    /// two corners, given in any order.
    pub fn search_window(&self, low: &[i64], high: &[i64]) -> RTreeResult<Vec<Record>> {
        self.check_closed()?;
        self.check_dims(low)?;
        self.check_dims(high)?;

        let window = Mbr::from_corners(low, high);
        let root = self.read_node(self.tree.root_id(), true)?;
        let mut matches = Vec::new();
        self.collect_window(&root, &window, true, &mut matches)?;
        Ok(matches)
    }

    /// The `k` live records closest to `point` by Euclidean distance,
    /// nearest first. Fewer than `k` exist: returns them all.
    ///
    /// Implemented as an expanding window: the search box grows by one
    /// per-axis step (1% of the root MBR width, at least 1) per round until
    /// it holds `k` candidates or covers the whole tree.
    pub fn search_knn(&self, k: usize, point: &[i64]) -> RTreeResult<Vec<Record>> {
        self.check_closed()?;
        self.check_dims(point)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let root = self.read_node(self.tree.root_id(), true)?;
        if root.child_count() == 0 {
            return Ok(Vec::new());
        }

        let steps: Vec<i64> = root
            .mbr
            .dims()
            .iter()
            .map(|dim| ((dim.width() as f64 * KNN_GROWTH_FACTOR).ceil() as i64).max(1))
            .collect();

        let mut window = Mbr::point(point);
        loop {
            window = Mbr::new(
                window
                    .dims()
                    .iter()
                    .zip(steps.iter())
                    .map(|(dim, &step)| {
                        MbrDim::new(dim.low.saturating_sub(step), dim.high.saturating_add(step))
                    })
                    .collect(),
            );

            let mut found = Vec::new();
            self.collect_window(&root, &window, true, &mut found)?;

            if found.len() >= k || window.contains(&root.mbr) {
                found.sort_by(|a, b| {
                    a.distance_to(point)
                        .partial_cmp(&b.distance_to(point))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                found.truncate(k);
                return Ok(found);
            }
        }
    }

    /// Removes one record stored at `point`: the offset leaves its leaf and
    /// the record is tombstoned. The leaf MBR is not shrunk; space comes
    /// back at the next [`rebuild`].
    ///
    /// [`rebuild`]: RTree::rebuild
    pub fn delete(&self, point: &[i64]) -> RTreeResult<bool> {
        self.check_closed()?;
        self.check_dims(point)?;

        let Some((_, offset, leaf_id)) = self.locate(point)? else {
            return Ok(false);
        };

        let mut leaf = self.read_node(leaf_id, false)?;
        let position = leaf
            .children
            .iter()
            .position(|&child| child == offset)
            .ok_or_else(|| {
                RTreeError::CorruptTree(format!(
                    "record offset {offset} missing from its leaf {leaf_id}"
                ))
            })?;
        leaf.children.remove(position);
        self.write_node(&leaf)?;
        self.records.tombstone(offset)?;
        Ok(true)
    }

    /// Rewrites both files from scratch: collects every live record,
    /// truncates the pair under a fresh pairing nonce and re-inserts.
    /// Tombstones vanish and all MBRs are minimally tight for the new
    /// insertion order. Idempotent.
    pub fn rebuild(&self) -> RTreeResult<()> {
        self.check_closed()?;

        let root = self.read_node(self.tree.root_id(), true)?;
        let mut offsets = Vec::new();
        self.collect_offsets(&root, &mut offsets)?;

        let mut survivors = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let record = self.records.get(offset)?;
            if record.live {
                survivors.push(record);
            }
        }
        log::debug!("rebuilding index with {} live records", survivors.len());

        let mut sequence = [0u8; UNIQUE_SEQUENCE_LEN];
        rand::thread_rng().fill_bytes(&mut sequence);
        self.tree.reset(sequence)?;
        self.records.reset(sequence)?;
        self.cache.write().clear();

        let root = RTreeNode::new_empty(self.config.dimensions, true, NULL_NODE_ID);
        let root_id = self.tree.create_node(&root)?;
        self.tree.set_root_id(root_id)?;

        for record in survivors {
            self.insert(&record.coordinates, &record.payload)?;
        }
        Ok(())
    }

    /// Flushes both files and captures the final tree header. Further
    /// operations fail with [`RTreeError::Closed`].
    pub fn close(&self) -> RTreeResult<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }
        self.tree.close()?;
        self.records.sync()?;
        *closed = true;
        Ok(())
    }

    /// Number of splits between the root and the leaves.
    pub fn tree_depth(&self) -> u32 {
        self.tree.tree_depth()
    }

    pub fn dimensions(&self) -> u32 {
        self.config.dimensions
    }

    /// Every node with its depth, root first. Feeds the visualizer; not
    /// meant for large trees.
    pub fn collect_nodes(&self) -> RTreeResult<Vec<(RTreeNode, u32)>> {
        self.check_closed()?;
        let root = self.read_node(self.tree.root_id(), true)?;
        let mut nodes = Vec::new();
        self.collect_nodes_from(root, 0, &mut nodes)?;
        Ok(nodes)
    }

    pub fn stats(&self) -> RTreeStats {
        RTreeStats {
            tree_depth: self.tree.tree_depth(),
            highest_node_id: self.tree.highest_id(),
            nodes_read: self.tree.nodes_read(),
            nodes_written: self.tree.nodes_written(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Descent and split machinery
    // ------------------------------------------------------------------

    /// Walks down from `node` to the leaf that should take `target`.
    ///
    /// At each internal level: a child that fully contains the target wins,
    /// smallest volume first; otherwise the child whose box grows least,
    /// ties broken by the smaller resulting volume, then first-seen order.
    fn choose_leaf(&self, node: RTreeNode, target: &Mbr) -> RTreeResult<RTreeNode> {
        if node.is_leaf {
            return Ok(node);
        }
        if node.children.is_empty() {
            return Err(RTreeError::CorruptTree(format!(
                "internal node {:?} has no children",
                node.id
            )));
        }
        let top_level = node.id == Some(self.tree.root_id());

        let mut children = Vec::with_capacity(node.children.len());
        for &child_id in &node.children {
            children.push(self.read_node(child_id, top_level)?);
        }

        let mut container: Option<usize> = None;
        let mut container_volume = i128::MAX;
        for (index, child) in children.iter().enumerate() {
            if child.mbr.contains(target) {
                let volume = child.mbr.volume();
                if container.is_none() || volume < container_volume {
                    container = Some(index);
                    container_volume = volume;
                }
            }
        }
        if let Some(index) = container {
            let chosen = children.swap_remove(index);
            return self.choose_leaf(chosen, target);
        }

        let mut best_index = 0;
        let mut best_cost = i128::MAX;
        let mut best_volume = i128::MAX;
        for (index, child) in children.iter().enumerate() {
            let cost = child.mbr.enlargement_cost(target);
            let volume = child.mbr.union(target).volume();
            if cost < best_cost || (cost == best_cost && volume < best_volume) {
                best_index = index;
                best_cost = cost;
                best_volume = volume;
            }
        }
        let chosen = children.swap_remove(best_index);
        self.choose_leaf(chosen, target)
    }

    /// Splits a full node that must still take `(new_child, new_box)`.
    ///
    /// The working copy briefly holds `M + 1` entries, which are then
    /// distributed onto two corner seeds. The low seed keeps the split
    /// node's id; the high seed is persisted as a new node and handed to
    /// the parent, recursively splitting it when it is full too. A split
    /// root is replaced by a fresh root holding both halves.
    fn handle_overflow(
        &self,
        mut node: RTreeNode,
        new_child: i64,
        new_box: &Mbr,
    ) -> RTreeResult<()> {
        let node_id = node.id.ok_or_else(|| {
            RTreeError::CorruptTree("cannot split a node that was never persisted".into())
        })?;
        let max_children = self.tree.max_children();
        let min_fill = self.config.min_fill;

        node.push_child(new_child, new_box);
        let (mut seed_low, mut seed_high) = node.seed_split_pair();

        for &child in &node.children {
            let child_box = if node.is_leaf {
                Mbr::point(&self.records.get(child)?.coordinates)
            } else {
                self.read_node(child, false)?.mbr
            };
            let low_cost = seed_low.mbr.enlargement_cost(&child_box);
            let high_cost = seed_high.mbr.enlargement_cost(&child_box);

            if seed_low.has_over_balance(max_children, min_fill) {
                seed_high.push_child(child, &child_box);
            } else if seed_high.has_over_balance(max_children, min_fill) {
                seed_low.push_child(child, &child_box);
            } else if low_cost > high_cost {
                seed_high.push_child(child, &child_box);
            } else if high_cost > low_cost {
                seed_low.push_child(child, &child_box);
            } else if seed_high.mbr.volume() > seed_low.mbr.volume() {
                seed_low.push_child(child, &child_box);
            } else {
                seed_high.push_child(child, &child_box);
            }
        }

        // the low seed reuses the split node's slot, the high seed is new
        seed_low.id = Some(node_id);
        let seed_high_id = self.tree.create_node(&seed_high)?;
        seed_high.id = Some(seed_high_id);
        self.write_node(&seed_low)?;
        self.reparent_children(&seed_high)?;
        log::debug!(
            "split node {} into {} ({} children) + {} ({} children)",
            node_id,
            node_id,
            seed_low.child_count(),
            seed_high_id,
            seed_high.child_count()
        );

        if node.is_root() {
            let mut new_root =
                RTreeNode::new_empty(self.config.dimensions, false, NULL_NODE_ID);
            new_root.insert_child(node_id, &seed_low.mbr, max_children)?;
            new_root.insert_child(seed_high_id, &seed_high.mbr, max_children)?;
            let new_root_id = self.tree.create_node(&new_root)?;
            new_root.id = Some(new_root_id);

            self.tree.set_root_id(new_root_id)?;
            self.tree.set_tree_depth(self.tree.tree_depth() + 1)?;
            log::debug!(
                "promoted node {} to root, tree depth now {}",
                new_root_id,
                self.tree.tree_depth()
            );

            seed_low.parent_id = new_root_id;
            seed_high.parent_id = new_root_id;
            self.write_node(&seed_low)?;
            self.write_node(&seed_high)?;
            self.cache.write().put(new_root, true);
        } else {
            let parent = self.read_node(node.parent_id, false)?;
            self.cache_store(&seed_high);
            if parent.is_full(max_children) {
                self.handle_overflow(parent, seed_high_id, &seed_high.mbr)?;
            } else {
                let mut parent = parent;
                parent.insert_child(seed_high_id, &seed_high.mbr, max_children)?;
                self.write_node(&parent)?;
            }
        }

        self.propagate_enlargement(node_id)?;
        self.propagate_enlargement(seed_high_id)
    }

    /// Walks from the node's parent towards the root, widening each
    /// ancestor that no longer covers its child. Stops at the first
    /// ancestor that already does.
    fn propagate_enlargement(&self, node_id: NodeId) -> RTreeResult<()> {
        let mut node = self.read_node(node_id, false)?;
        loop {
            if node.is_root() {
                return Ok(());
            }
            let mut parent = self.read_node(node.parent_id, false)?;
            if parent.mbr.contains(&node.mbr) {
                return Ok(());
            }
            parent.mbr.enlarge(&node.mbr);
            self.write_node(&parent)?;
            node = parent;
        }
    }

    /// After a split moved children under a freshly created internal node,
    /// their back-pointers must follow.
    fn reparent_children(&self, parent: &RTreeNode) -> RTreeResult<()> {
        if parent.is_leaf {
            return Ok(());
        }
        let parent_id = parent.id.ok_or_else(|| {
            RTreeError::CorruptTree("cannot reparent under a node without an id".into())
        })?;
        for &child_id in &parent.children {
            let mut child = self.read_node(child_id, false)?;
            if child.parent_id != parent_id {
                child.parent_id = parent_id;
                self.write_node(&child)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Point search returning the record, its offset and its leaf, for
    /// `delete` and `search_point` alike.
    fn locate(&self, point: &[i64]) -> RTreeResult<Option<(Record, RecordOffset, NodeId)>> {
        let root = self.read_node(self.tree.root_id(), true)?;
        self.locate_in(&root, point, true)
    }

    fn locate_in(
        &self,
        node: &RTreeNode,
        point: &[i64],
        top_level: bool,
    ) -> RTreeResult<Option<(Record, RecordOffset, NodeId)>> {
        if node.is_leaf {
            for &offset in &node.children {
                let record = self.records.get(offset)?;
                if record.live && record.coordinates == point {
                    let leaf_id = node.id.unwrap_or(NULL_NODE_ID);
                    return Ok(Some((record, offset, leaf_id)));
                }
            }
            return Ok(None);
        }
        for &child_id in &node.children {
            let child = self.read_node(child_id, top_level)?;
            if child.mbr.contains_point(point) {
                if let Some(found) = self.locate_in(&child, point, false)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    fn collect_window(
        &self,
        node: &RTreeNode,
        window: &Mbr,
        top_level: bool,
        matches: &mut Vec<Record>,
    ) -> RTreeResult<()> {
        if node.is_leaf {
            for &offset in &node.children {
                let record = self.records.get(offset)?;
                if record.live && window.contains_point(&record.coordinates) {
                    matches.push(record);
                }
            }
            return Ok(());
        }
        for &child_id in &node.children {
            let child = self.read_node(child_id, top_level)?;
            if child.mbr.overlaps(window) {
                self.collect_window(&child, window, false, matches)?;
            }
        }
        Ok(())
    }

    fn collect_offsets(&self, node: &RTreeNode, offsets: &mut Vec<RecordOffset>) -> RTreeResult<()> {
        if node.is_leaf {
            offsets.extend(node.children.iter().copied());
            return Ok(());
        }
        for &child_id in &node.children {
            let child = self.read_node(child_id, false)?;
            self.collect_offsets(&child, offsets)?;
        }
        Ok(())
    }

    fn collect_nodes_from(
        &self,
        node: RTreeNode,
        depth: u32,
        nodes: &mut Vec<(RTreeNode, u32)>,
    ) -> RTreeResult<()> {
        if node.is_leaf {
            nodes.push((node, depth));
            return Ok(());
        }
        let children = node.children.clone();
        nodes.push((node, depth));
        for child_id in children {
            let child = self.read_node(child_id, false)?;
            self.collect_nodes_from(child, depth + 1, nodes)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Node I/O through the cache
    // ------------------------------------------------------------------

    /// Cache read-through. `top_level` signals a lookup at the root level,
    /// which lives in the permanent cache region.
    fn read_node(&self, node_id: NodeId, top_level: bool) -> RTreeResult<RTreeNode> {
        {
            let cache = self.cache.read();
            if let Some(node) = cache.get(node_id, top_level) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(node.clone());
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let node = self.tree.get(node_id)?;
        self.cache.write().put(node.clone(), top_level);
        Ok(node)
    }

    /// Write-through: persist the node, then refresh the cache with an
    /// owned copy.
    fn write_node(&self, node: &RTreeNode) -> RTreeResult<()> {
        let node_id = node.id.ok_or_else(|| {
            RTreeError::CorruptTree("cannot persist a node without an id".into())
        })?;
        self.tree.update(node_id, node)?;
        self.cache_store(node);
        Ok(())
    }

    fn cache_store(&self, node: &RTreeNode) {
        let root_id = self.tree.root_id();
        let top_level = node.id == Some(root_id) || node.parent_id == root_id;
        self.cache.write().put(node.clone(), top_level);
    }

    fn check_closed(&self) -> RTreeResult<()> {
        if *self.closed.read() {
            Err(RTreeError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_dims(&self, coordinates: &[i64]) -> RTreeResult<()> {
        if coordinates.len() != self.config.dimensions as usize {
            return Err(RTreeError::DimMismatch {
                expected: self.config.dimensions as usize,
                actual: coordinates.len(),
            });
        }
        Ok(())
    }
}

impl Drop for RTree {
    fn drop(&mut self) {
        // best effort flush; the flag is copied out so close() can relock
        let closed = *self.closed.read();
        if !closed {
            let _ = self.close();
        }
    }
}

fn remove_if_exists(path: &std::path::Path) -> RTreeResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RTreeError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_default(dir: &std::path::Path) -> RTree {
        RTree::open(RTreeConfig::new(dir)).unwrap()
    }

    /// Tiny pages so splits happen after four entries.
    fn open_small(dir: &std::path::Path) -> RTree {
        RTree::open(RTreeConfig::new(dir).page_size(64)).unwrap()
    }

    #[test]
    fn test_insert_then_point_search() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        tree.insert(&[3, 7], b"payload").unwrap();
        let found = tree.search_point(&[3, 7]).unwrap().unwrap();
        assert!(found.live);
        assert_eq!(found.payload, b"payload".to_vec());

        assert!(tree.search_point(&[3, 8]).unwrap().is_none());
    }

    #[test]
    fn test_dimension_checks_at_the_boundary() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        assert!(matches!(
            tree.insert(&[1, 2, 3], b""),
            Err(RTreeError::DimMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(matches!(
            tree.search_point(&[1]),
            Err(RTreeError::DimMismatch { .. })
        ));
        assert!(matches!(
            tree.search_window(&[0, 0], &[1]),
            Err(RTreeError::DimMismatch { .. })
        ));
        assert!(matches!(
            tree.search_knn(1, &[1, 2, 3]),
            Err(RTreeError::DimMismatch { .. })
        ));
        assert!(matches!(
            tree.delete(&[1]),
            Err(RTreeError::DimMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_points_are_kept_apart() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        tree.insert(&[5, 5], b"first").unwrap();
        tree.insert(&[5, 5], b"second").unwrap();

        let at_point = tree.search_window(&[5, 5], &[5, 5]).unwrap();
        assert_eq!(at_point.len(), 2);

        // point search returns some live record at the point
        let found = tree.search_point(&[5, 5]).unwrap().unwrap();
        assert!(found.payload == b"first".to_vec() || found.payload == b"second".to_vec());
    }

    #[test]
    fn test_zero_width_window_degenerates_to_point() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        tree.insert(&[2, 2], b"a").unwrap();
        tree.insert(&[2, 2], b"b").unwrap();
        tree.insert(&[2, 3], b"c").unwrap();

        let hits = tree.search_window(&[2, 2], &[2, 2]).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|record| record.coordinates == vec![2, 2]));
    }

    #[test]
    fn test_window_corners_in_any_order() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());
        tree.insert(&[1, 1], b"a").unwrap();

        let hits = tree.search_window(&[5, 5], &[0, 0]).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_delete_hides_record_from_queries() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        tree.insert(&[4, 4], b"goner").unwrap();
        assert!(tree.delete(&[4, 4]).unwrap());
        assert!(!tree.delete(&[4, 4]).unwrap());

        assert!(tree.search_point(&[4, 4]).unwrap().is_none());
        assert!(tree.search_window(&[0, 0], &[9, 9]).unwrap().is_empty());
        assert!(tree.search_knn(1, &[4, 4]).unwrap().is_empty());
    }

    #[test]
    fn test_split_grows_depth_and_keeps_entries() {
        let dir = tempdir().unwrap();
        let tree = open_small(dir.path());

        let points = [[0, 0], [10, 0], [0, 10], [10, 10], [5, 5]];
        for (index, point) in points.iter().enumerate() {
            tree.insert(point, format!("{index}").as_bytes()).unwrap();
        }

        assert!(tree.tree_depth() >= 1);
        let hits = tree.search_window(&[-1, -1], &[11, 11]).unwrap();
        assert_eq!(hits.len(), 5);
        for point in &points {
            assert!(tree.search_point(point).unwrap().is_some());
        }
    }

    #[test]
    fn test_tree_invariants_after_many_inserts() {
        let dir = tempdir().unwrap();
        let tree = open_small(dir.path());
        let max_children = 4;

        for i in 0..60i64 {
            tree.insert(&[(i * 7) % 23, (i * 13) % 19], b"x").unwrap();
        }

        let nodes = tree.collect_nodes().unwrap();
        let by_id: std::collections::HashMap<NodeId, &RTreeNode> = nodes
            .iter()
            .map(|(node, _)| (node.id.unwrap(), node))
            .collect();

        let mut roots = 0;
        for (node, _) in &nodes {
            assert!(node.child_count() <= max_children);
            if node.is_root() {
                roots += 1;
                continue;
            }
            let parent = by_id[&node.parent_id];
            assert!(parent.children.contains(&node.id.unwrap()));
            assert!(parent.mbr.contains(&node.mbr));
        }
        assert_eq!(roots, 1);

        // every internal MBR is exactly the union of its children
        for (node, _) in &nodes {
            if node.is_leaf {
                continue;
            }
            let mut expected: Option<Mbr> = None;
            for child_id in &node.children {
                let child_mbr = &by_id[child_id].mbr;
                expected = Some(match expected {
                    None => child_mbr.clone(),
                    Some(mbr) => mbr.union(child_mbr),
                });
            }
            assert_eq!(node.mbr, expected.unwrap());
        }
    }

    #[test]
    fn test_knn_orders_by_distance() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        tree.insert(&[1, 4], b"a").unwrap();
        tree.insert(&[1, 1], b"b").unwrap();
        tree.insert(&[-1, -1], b"c").unwrap();

        let nearest = tree.search_knn(4, &[0, 4]).unwrap();
        let payloads: Vec<_> = nearest.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn test_knn_truncates_to_k() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());

        for i in 0..10i64 {
            tree.insert(&[i, 0], b"p").unwrap();
        }
        let nearest = tree.search_knn(3, &[0, 0]).unwrap();
        assert_eq!(nearest.len(), 3);
        let coords: Vec<_> = nearest.iter().map(|r| r.coordinates[0]).collect();
        assert_eq!(coords, vec![0, 1, 2]);
    }

    #[test]
    fn test_knn_on_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());
        assert!(tree.search_knn(5, &[100, 100]).unwrap().is_empty());
    }

    #[test]
    fn test_knn_zero_k() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());
        tree.insert(&[0, 0], b"a").unwrap();
        assert!(tree.search_knn(0, &[0, 0]).unwrap().is_empty());
    }

    #[test]
    fn test_closed_index_rejects_operations() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());
        tree.insert(&[0, 0], b"a").unwrap();
        tree.close().unwrap();
        // closing twice is fine
        tree.close().unwrap();

        assert!(matches!(tree.insert(&[1, 1], b"b"), Err(RTreeError::Closed)));
        assert!(matches!(tree.search_point(&[0, 0]), Err(RTreeError::Closed)));
        assert!(matches!(tree.rebuild(), Err(RTreeError::Closed)));
    }

    #[test]
    fn test_rebuild_drops_tombstones() {
        let dir = tempdir().unwrap();
        let tree = open_small(dir.path());

        for i in 0..20i64 {
            tree.insert(&[i, i], format!("{i}").as_bytes()).unwrap();
        }
        for i in 0..10i64 {
            assert!(tree.delete(&[i, i]).unwrap());
        }

        tree.rebuild().unwrap();

        let survivors = tree.search_window(&[0, 0], &[30, 30]).unwrap();
        assert_eq!(survivors.len(), 10);
        for i in 10..20i64 {
            let found = tree.search_point(&[i, i]).unwrap().unwrap();
            assert_eq!(found.payload, format!("{i}").into_bytes());
        }
    }

    #[test]
    fn test_stats_track_io() {
        let dir = tempdir().unwrap();
        let tree = open_default(dir.path());
        tree.insert(&[0, 0], b"a").unwrap();
        tree.search_point(&[0, 0]).unwrap();

        let stats = tree.stats();
        assert!(stats.nodes_written >= 1);
        assert_eq!(stats.highest_node_id, 0);
        assert_eq!(stats.tree_depth, 0);
        assert!(stats.cache_hits + stats.cache_misses >= 1);
    }
}
