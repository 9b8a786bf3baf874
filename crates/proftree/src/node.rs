//! Hierarchy nodes and the generational arena that owns them.
//!
//! A parent owns its children through its [`ChildList`]; the `parent` link on
//! each node is a plain, non-owning [`NodeId`]. Destroying a node is a
//! top-down walk from whichever node is explicitly removed.
//!
//! # Invariants
//!
//! 1. A freed slot bumps its generation, so an id that outlived its node is
//!    reported as stale instead of silently aliasing a newer node.
//! 2. `index` equals the node's position in its parent's child list.
//! 3. The root is the only node without a parent that is still reachable.

use std::fmt;
use std::ops::{Index, IndexMut};

use bitflags::bitflags;

use crate::children::ChildList;

/// Stable handle to a node in one engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    slot: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn from_raw_parts(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Arena slot of this node. Slots are reused after removal.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Generation of the slot when this id was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

bitflags! {
    /// Per-node state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Currently expanded.
        const EXPANDED      = 0b0001;
        /// Children were materialized from the source for the current
        /// child generation.
        const EXPANDED_ONCE = 0b0010;
        /// The source says this node could have children.
        const HAS_CHILDREN  = 0b0100;
        /// The engine holds a change subscription for this node's children.
        const SUBSCRIBED    = 0b1000;
    }
}

/// One entry in the logical hierarchy.
#[derive(Debug, Clone)]
pub struct Node<T> {
    tag: Option<T>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: ChildList,
    pub(crate) index: usize,
    pub(crate) flags: NodeFlags,
}

impl<T> Node<T> {
    pub(crate) fn root() -> Self {
        Self {
            tag: None,
            parent: None,
            children: ChildList::default(),
            index: 0,
            flags: NodeFlags::EXPANDED,
        }
    }

    pub(crate) fn new(tag: T, has_children: bool) -> Self {
        let mut flags = NodeFlags::empty();
        flags.set(NodeFlags::HAS_CHILDREN, has_children);
        Self {
            tag: Some(tag),
            parent: None,
            children: ChildList::default(),
            index: 0,
            flags,
        }
    }

    /// Caller payload. `None` only for the root sentinel.
    #[must_use]
    pub fn tag(&self) -> Option<&T> {
        self.tag.as_ref()
    }

    /// Owning parent, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child ids in sibling order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        self.children.as_slice()
    }

    /// Position within the parent's child list.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw state bits.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.flags.contains(NodeFlags::EXPANDED)
    }

    #[must_use]
    pub fn is_expanded_once(&self) -> bool {
        self.flags.contains(NodeFlags::EXPANDED_ONCE)
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        self.flags.contains(NodeFlags::HAS_CHILDREN)
    }

    /// Whether expanding this node can reveal anything.
    ///
    /// True before the first query when the source reported children, and
    /// afterwards whenever at least one child node exists.
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        (self.has_children() && !self.is_expanded_once()) || !self.children.is_empty()
    }

    /// The root sentinel is the only node without a tag.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.tag.is_none()
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Generational storage for every node of one tree.
#[derive(Debug, Clone)]
pub(crate) struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> NodeArena<T> {
    /// Fresh arena holding only the root sentinel, returned alongside.
    pub(crate) fn with_root() -> (Self, NodeId) {
        let mut arena = Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        };
        let root = arena.alloc(Node::root());
        (arena, root)
    }

    pub(crate) fn alloc(&mut self, node: Node<T>) -> NodeId {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.node = Some(node);
            return NodeId::from_raw_parts(slot, entry.generation);
        }
        let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::from_raw_parts(slot, 0)
    }

    /// Release one slot. Children are not touched; callers free subtrees
    /// top-down themselves.
    pub(crate) fn free(&mut self, id: NodeId) -> Option<Node<T>> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live -= 1;
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node<T>> {
        let entry = self.slots.get(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_mut()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live nodes, root included.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Iterate every live node.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &Node<T>)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry
                .node
                .as_ref()
                .map(|node| (NodeId::from_raw_parts(slot as u32, entry.generation), node))
        })
    }
}

impl<T> Index<NodeId> for NodeArena<T> {
    type Output = Node<T>;

    fn index(&self, id: NodeId) -> &Node<T> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale node id {id}"),
        }
    }
}

impl<T> IndexMut<NodeId> for NodeArena<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node id {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_expanded_and_untagged() {
        let (arena, root) = NodeArena::<u32>::with_root();
        let node = &arena[root];
        assert!(node.is_expanded());
        assert!(node.is_root());
        assert!(node.parent().is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let (mut arena, _root) = NodeArena::with_root();
        let a = arena.alloc(Node::new(1u32, false));
        assert!(arena.free(a).is_some());
        assert!(!arena.contains(a));

        let b = arena.alloc(Node::new(2u32, false));
        assert_eq!(a.slot(), b.slot());
        assert_ne!(a.generation(), b.generation());
        assert!(arena.get(a).is_none());
        assert_eq!(arena[b].tag(), Some(&2));
    }

    #[test]
    fn double_free_is_rejected() {
        let (mut arena, _root) = NodeArena::with_root();
        let a = arena.alloc(Node::new("a", false));
        assert!(arena.free(a).is_some());
        assert!(arena.free(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn expandable_before_and_after_query() {
        let mut node = Node::new("fn", true);
        assert!(node.is_expandable());

        // Queried, source returned nothing.
        node.flags.insert(NodeFlags::EXPANDED_ONCE);
        assert!(!node.is_expandable());

        let leaf = Node::new("line", false);
        assert!(!leaf.is_expandable());
    }

    #[test]
    fn iter_skips_free_slots() {
        let (mut arena, root) = NodeArena::with_root();
        let a = arena.alloc(Node::new('a', false));
        let b = arena.alloc(Node::new('b', false));
        arena.free(a);
        let ids: Vec<_> = arena.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![root, b]);
    }

    #[test]
    #[should_panic(expected = "stale node id")]
    fn indexing_stale_id_panics() {
        let (mut arena, _root) = NodeArena::with_root();
        let a = arena.alloc(Node::new(0u8, false));
        arena.free(a);
        let _ = &arena[a];
    }
}
