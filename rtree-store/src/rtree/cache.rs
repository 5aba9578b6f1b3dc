//! Two-tier direct-mapped cache in front of the paged tree store.
//!
//! The permanent region holds the top of the tree (root plus one level, so
//! `M + 1` slots) and is never evicted. The variable region is sized by a
//! byte budget and direct-mapped: a collision simply replaces the previous
//! occupant. Cached nodes are owned copies, never aliases into live engine
//! state — a mutation goes node → store → fresh copy into the cache.
//!
//! The cache is a throughput aid only; the engine stays correct without it.

use crate::rtree::node::RTreeNode;
use crate::rtree::types::NodeId;

pub struct NodeCache {
    /// Root level; indexed `id mod (M + 1)`, never evicted.
    permanent: Vec<Option<RTreeNode>>,
    /// Everything else; indexed `id mod capacity`, direct-mapped.
    variable: Vec<Option<RTreeNode>>,
}

impl NodeCache {
    /// `max_children` sizes the permanent region; the variable region gets
    /// `cache_bytes / page_size` slots (at least one).
    pub fn new(max_children: usize, page_size: u32, cache_bytes: usize) -> NodeCache {
        let variable_slots = (cache_bytes / page_size as usize).max(1);
        NodeCache {
            permanent: vec![None; max_children + 1],
            variable: vec![None; variable_slots],
        }
    }

    fn permanent_slot(&self, node_id: NodeId) -> usize {
        node_id.unsigned_abs() as usize % self.permanent.len()
    }

    fn variable_slot(&self, node_id: NodeId) -> usize {
        node_id.unsigned_abs() as usize % self.variable.len()
    }

    /// Looks up a node in the tier the caller expects it in. `permanent`
    /// signals a lookup near the top of the tree.
    pub fn get(&self, node_id: NodeId, permanent: bool) -> Option<&RTreeNode> {
        let slot = if permanent {
            self.permanent[self.permanent_slot(node_id)].as_ref()
        } else {
            self.variable[self.variable_slot(node_id)].as_ref()
        };
        // direct mapping means the slot may hold a different node
        slot.filter(|node| node.id == Some(node_id))
    }

    /// Stores an owned copy of `node` in the flagged tier and drops any
    /// stale copy of the same node from the other tier, so a node whose
    /// tier changes (root promotion) can never be served stale.
    pub fn put(&mut self, node: RTreeNode, permanent: bool) {
        let node_id = match node.id {
            Some(id) => id,
            None => return,
        };

        if permanent {
            let other = self.variable_slot(node_id);
            if self.variable[other]
                .as_ref()
                .is_some_and(|cached| cached.id == Some(node_id))
            {
                self.variable[other] = None;
            }
            let slot = self.permanent_slot(node_id);
            self.permanent[slot] = Some(node);
        } else {
            let other = self.permanent_slot(node_id);
            if self.permanent[other]
                .as_ref()
                .is_some_and(|cached| cached.id == Some(node_id))
            {
                self.permanent[other] = None;
            }
            let slot = self.variable_slot(node_id);
            self.variable[slot] = Some(node);
        }
    }

    /// Empties both tiers. Used by rebuild, which invalidates every id.
    pub fn clear(&mut self) {
        self.permanent.iter_mut().for_each(|slot| *slot = None);
        self.variable.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbr::Mbr;

    fn node(id: NodeId) -> RTreeNode {
        RTreeNode {
            id: Some(id),
            parent_id: -1,
            is_leaf: true,
            mbr: Mbr::point(&[id, id]),
            children: vec![],
        }
    }

    #[test]
    fn test_miss_on_empty_cache() {
        let cache = NodeCache::new(4, 64, 1024);
        assert!(cache.get(0, true).is_none());
        assert!(cache.get(0, false).is_none());
    }

    #[test]
    fn test_put_and_get_per_tier() {
        let mut cache = NodeCache::new(4, 64, 1024);
        cache.put(node(2), true);
        cache.put(node(3), false);

        assert_eq!(cache.get(2, true).unwrap().id, Some(2));
        assert_eq!(cache.get(3, false).unwrap().id, Some(3));
        // each tier only answers for what it holds
        assert!(cache.get(2, false).is_none());
        assert!(cache.get(3, true).is_none());
    }

    #[test]
    fn test_collision_replaces_occupant() {
        // permanent region has 5 slots, so ids 1 and 6 collide
        let mut cache = NodeCache::new(4, 64, 1024);
        cache.put(node(1), true);
        cache.put(node(6), true);

        assert!(cache.get(1, true).is_none());
        assert_eq!(cache.get(6, true).unwrap().id, Some(6));
    }

    #[test]
    fn test_slot_holding_other_node_is_a_miss() {
        let mut cache = NodeCache::new(4, 64, 1024);
        cache.put(node(6), true);
        // id 1 maps to the same slot but is not the cached node
        assert!(cache.get(1, true).is_none());
    }

    #[test]
    fn test_put_refreshes_and_invalidates_other_tier() {
        let mut cache = NodeCache::new(4, 64, 1024);
        let mut stale = node(7);
        stale.children = vec![100];
        cache.put(stale, false);

        let mut fresh = node(7);
        fresh.children = vec![100, 200];
        cache.put(fresh, true);

        assert_eq!(cache.get(7, true).unwrap().children.len(), 2);
        assert!(cache.get(7, false).is_none());
    }

    #[test]
    fn test_variable_region_respects_byte_budget() {
        // 1024 bytes at 256-byte pages = 4 slots; ids 0 and 4 collide
        let mut cache = NodeCache::new(4, 256, 1024);
        cache.put(node(0), false);
        cache.put(node(4), false);
        assert!(cache.get(0, false).is_none());
        assert_eq!(cache.get(4, false).unwrap().id, Some(4));
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let mut cache = NodeCache::new(4, 64, 1024);
        cache.put(node(1), true);
        cache.put(node(2), false);
        cache.clear();
        assert!(cache.get(1, true).is_none());
        assert!(cache.get(2, false).is_none());
    }
}
