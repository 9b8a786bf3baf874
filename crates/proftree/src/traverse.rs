//! Sibling, ancestor and visible-order walks over the arena.
//!
//! The visible walk follows projection order: first child if the node is
//! expanded and has children, else the next sibling, else the next sibling
//! of the nearest ancestor that has one. Each step costs O(depth), never
//! O(subtree), so it stays cheap while part of a subtree is hidden.

use crate::node::{NodeArena, NodeId};

impl<T> NodeArena<T> {
    /// Depth of a node. The root is `-1`, top-level rows are `0`.
    pub(crate) fn level(&self, id: NodeId) -> isize {
        let mut level = -1;
        let mut cursor = self[id].parent;
        while let Some(parent) = cursor {
            level += 1;
            cursor = self[parent].parent;
        }
        level
    }

    pub(crate) fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let node = &self[id];
        let parent = node.parent?;
        let index = node.index.checked_sub(1)?;
        self[parent].children.get(index)
    }

    pub(crate) fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let node = &self[id];
        let parent = node.parent?;
        self[parent].children.get(node.index + 1)
    }

    /// True when every ancestor is expanded. The root counts as visible.
    pub(crate) fn is_visible(&self, id: NodeId) -> bool {
        let mut cursor = self[id].parent;
        while let Some(parent) = cursor {
            let node = &self[parent];
            if !node.is_expanded() {
                return false;
            }
            cursor = node.parent;
        }
        true
    }

    /// True when `id` is `ancestor` or one of its descendants.
    pub(crate) fn is_in_subtree(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self[node].parent;
        }
        false
    }

    /// Next node in projection order, or `None` past the last row.
    pub(crate) fn next_visible(&self, id: NodeId) -> Option<NodeId> {
        let node = &self[id];
        if node.is_expanded()
            && let Some(first) = node.children.first()
        {
            return Some(first);
        }
        let mut cursor = id;
        loop {
            if let Some(sibling) = self.next_sibling(cursor) {
                return Some(sibling);
            }
            cursor = self[cursor].parent?;
        }
    }

    /// Lazy walk over the visible descendants of `id`, in projection order.
    pub(crate) fn visible_descendants(&self, id: NodeId) -> VisibleDescendants<'_, T> {
        VisibleDescendants {
            arena: self,
            cursor: id,
            depth: 0,
            done: false,
        }
    }

    /// Recursive pre-order collection of the visible descendants. Used to
    /// cross-check the incremental walk.
    pub(crate) fn collect_visible_recursive(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if !self[id].is_expanded() {
            return;
        }
        for child in self[id].children.iter() {
            out.push(child);
            self.collect_visible_recursive(child, out);
        }
    }
}

/// Iterator over the visible descendants of one node.
///
/// Stops as soon as the walk climbs back to the starting depth. Depth is
/// tracked relative to the start, so no step re-walks the ancestor chain.
#[derive(Debug)]
pub struct VisibleDescendants<'a, T> {
    arena: &'a NodeArena<T>,
    cursor: NodeId,
    depth: isize,
    done: bool,
}

impl<T> Iterator for VisibleDescendants<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.done {
            return None;
        }
        let node = &self.arena[self.cursor];
        if node.is_expanded()
            && let Some(first) = node.children.first()
        {
            self.cursor = first;
            self.depth += 1;
            return Some(first);
        }
        // Climb until a next sibling exists above the start depth.
        let mut cursor = self.cursor;
        let mut depth = self.depth;
        while depth > 0 {
            if let Some(sibling) = self.arena.next_sibling(cursor) {
                self.cursor = sibling;
                self.depth = depth;
                return Some(sibling);
            }
            match self.arena[cursor].parent {
                Some(parent) => cursor = parent,
                None => break,
            }
            depth -= 1;
        }
        self.done = true;
        None
    }
}

impl<T> std::iter::FusedIterator for VisibleDescendants<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeFlags};

    // root
    // ├── a (expanded)
    // │   ├── a1 (expanded)
    // │   │   └── a1x
    // │   └── a2
    // └── b (collapsed)
    //     └── b1
    struct Fixture {
        arena: NodeArena<&'static str>,
        root: NodeId,
        a: NodeId,
        a1: NodeId,
        a1x: NodeId,
        a2: NodeId,
        b: NodeId,
        b1: NodeId,
    }

    fn fixture() -> Fixture {
        let (mut arena, root) = NodeArena::with_root();
        let add = |arena: &mut NodeArena<&'static str>, parent, tag, expanded| {
            let id = arena.alloc(Node::new(tag, false));
            if expanded {
                arena[id].flags.insert(NodeFlags::EXPANDED);
            }
            arena.push_child(parent, id).unwrap();
            id
        };
        let a = add(&mut arena, root, "a", true);
        let a1 = add(&mut arena, a, "a1", true);
        let a1x = add(&mut arena, a1, "a1x", false);
        let a2 = add(&mut arena, a, "a2", false);
        let b = add(&mut arena, root, "b", false);
        let b1 = add(&mut arena, b, "b1", false);
        Fixture {
            arena,
            root,
            a,
            a1,
            a1x,
            a2,
            b,
            b1,
        }
    }

    #[test]
    fn levels_start_below_root() {
        let f = fixture();
        assert_eq!(f.arena.level(f.root), -1);
        assert_eq!(f.arena.level(f.a), 0);
        assert_eq!(f.arena.level(f.a1x), 2);
    }

    #[test]
    fn siblings() {
        let f = fixture();
        assert_eq!(f.arena.next_sibling(f.a), Some(f.b));
        assert_eq!(f.arena.previous_sibling(f.b), Some(f.a));
        assert_eq!(f.arena.previous_sibling(f.a), None);
        assert_eq!(f.arena.next_sibling(f.b), None);
        assert_eq!(f.arena.next_sibling(f.root), None);
    }

    #[test]
    fn next_visible_walks_bottom_up() {
        let f = fixture();
        assert_eq!(f.arena.next_visible(f.a), Some(f.a1));
        assert_eq!(f.arena.next_visible(f.a1), Some(f.a1x));
        assert_eq!(f.arena.next_visible(f.a1x), Some(f.a2));
        assert_eq!(f.arena.next_visible(f.a2), Some(f.b));
        // b is collapsed, so b1 is skipped.
        assert_eq!(f.arena.next_visible(f.b), None);
    }

    #[test]
    fn visibility_follows_ancestors() {
        let f = fixture();
        assert!(f.arena.is_visible(f.a1x));
        assert!(f.arena.is_visible(f.b));
        assert!(!f.arena.is_visible(f.b1));
    }

    #[test]
    fn visible_descendants_stop_at_start_depth() {
        let f = fixture();
        let under_a: Vec<_> = f.arena.visible_descendants(f.a).collect();
        assert_eq!(under_a, vec![f.a1, f.a1x, f.a2]);

        let under_a1: Vec<_> = f.arena.visible_descendants(f.a1).collect();
        assert_eq!(under_a1, vec![f.a1x]);

        assert_eq!(f.arena.visible_descendants(f.b).count(), 0);
        assert_eq!(f.arena.visible_descendants(f.a2).count(), 0);
    }

    #[test]
    fn visible_descendants_of_root_match_recursive_walk() {
        let f = fixture();
        let walked: Vec<_> = f.arena.visible_descendants(f.root).collect();
        let mut expected = Vec::new();
        f.arena.collect_visible_recursive(f.root, &mut expected);
        assert_eq!(walked, expected);
        assert_eq!(walked, vec![f.a, f.a1, f.a1x, f.a2, f.b]);
    }

    #[test]
    fn subtree_membership() {
        let f = fixture();
        assert!(f.arena.is_in_subtree(f.a1x, f.a));
        assert!(f.arena.is_in_subtree(f.a, f.a));
        assert!(!f.arena.is_in_subtree(f.b1, f.a));
    }
}
