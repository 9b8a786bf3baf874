//! Ordered child collection.
//!
//! [`ChildList`] stores a parent's children in sibling order. All structural
//! edits go through [`NodeArena`] so the parent link and sibling index of
//! every affected node are rewritten in the same step:
//!
//! - insert: idempotent for an existing direct child, detaches the node from
//!   any previous parent first, shifts later siblings by +1;
//! - remove: clears the removed node's parent link, shifts later siblings
//!   by -1;
//! - replace: remove followed by insert at the same position.

use crate::error::TreeError;
use crate::node::{NodeArena, NodeId};

/// A parent's children in sibling order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildList {
    ids: Vec<NodeId>,
}

impl ChildList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.ids.get(index).copied()
    }

    #[must_use]
    pub fn first(&self) -> Option<NodeId> {
        self.ids.first().copied()
    }

    #[must_use]
    pub fn last(&self) -> Option<NodeId> {
        self.ids.last().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.ids.iter().copied()
    }

    pub(crate) fn take_all(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.ids)
    }
}

impl<T> NodeArena<T> {
    /// Insert `child` into `owner`'s children at `at`.
    ///
    /// Returns `Ok(false)` without changes when `child` already is a direct
    /// child of `owner`.
    pub(crate) fn insert_child(
        &mut self,
        owner: NodeId,
        at: usize,
        child: NodeId,
    ) -> Result<bool, TreeError> {
        let len = self
            .get(owner)
            .ok_or(TreeError::StaleNode { node: owner })?
            .children
            .len();
        let previous = self
            .get(child)
            .ok_or(TreeError::StaleNode { node: child })?
            .parent;
        if previous == Some(owner) {
            return Ok(false);
        }
        if at > len {
            return Err(TreeError::IndexOutOfRange {
                parent: owner,
                index: at,
                len,
            });
        }

        if let Some(old_parent) = previous {
            let old_index = self[child].index;
            self.remove_child_at(old_parent, old_index)?;
        }

        self[owner].children.ids.insert(at, child);
        let node = &mut self[child];
        node.parent = Some(owner);
        node.index = at;
        self.reindex_from(owner, at + 1);
        Ok(true)
    }

    /// Append `child` after `owner`'s last child.
    pub(crate) fn push_child(&mut self, owner: NodeId, child: NodeId) -> Result<bool, TreeError> {
        let len = self
            .get(owner)
            .ok_or(TreeError::StaleNode { node: owner })?
            .children
            .len();
        self.insert_child(owner, len, child)
    }

    /// Detach the child at `at` and return it. The detached node keeps its
    /// own children.
    pub(crate) fn remove_child_at(&mut self, owner: NodeId, at: usize) -> Result<NodeId, TreeError> {
        let parent = self
            .get_mut(owner)
            .ok_or(TreeError::StaleNode { node: owner })?;
        let len = parent.children.len();
        if at >= len {
            return Err(TreeError::IndexOutOfRange {
                parent: owner,
                index: at,
                len,
            });
        }
        let child = parent.children.ids.remove(at);
        let node = &mut self[child];
        node.parent = None;
        node.index = 0;
        self.reindex_from(owner, at);
        Ok(child)
    }

    /// Swap the child at `at` for `child`, returning the detached node.
    pub(crate) fn replace_child_at(
        &mut self,
        owner: NodeId,
        at: usize,
        child: NodeId,
    ) -> Result<NodeId, TreeError> {
        let node = self.get(child).ok_or(TreeError::StaleNode { node: child })?;
        if node.parent == Some(owner) {
            return Err(TreeError::AlreadyChild {
                node: child,
                parent: owner,
            });
        }
        let old = self.remove_child_at(owner, at)?;
        self.insert_child(owner, at, child)?;
        Ok(old)
    }

    fn reindex_from(&mut self, owner: NodeId, from: usize) {
        let count = self[owner].children.len();
        for index in from..count {
            let id = self[owner].children.ids[index];
            self[id].index = index;
        }
    }
}
