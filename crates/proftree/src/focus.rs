//! Focus and selection continuity across structural changes.
//!
//! Node ids stay stable while rows shift, so selection is tracked by id and
//! only needs attention when its node disappears from the projection or from
//! the tree. The pending-focus slot covers the other direction: a node asked
//! to take focus before it had a row.
//!
//! Both slots belong to one engine instance.

use crate::node::NodeId;

/// Result of [`TreeEngine::focus`](crate::TreeEngine::focus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequest {
    /// The node is on screen at this row; focus it now.
    Row(usize),
    /// The node has no row yet; it was stored as the pending focus.
    Pending,
}

/// Pending focus plus current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusContinuity {
    pending: Option<NodeId>,
    selected: Option<NodeId>,
}

impl FocusContinuity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Node waiting to receive focus once it has a row.
    #[must_use]
    pub fn pending(&self) -> Option<NodeId> {
        self.pending
    }

    pub fn set_pending(&mut self, node: NodeId) {
        self.pending = Some(node);
    }

    /// Clear the pending slot, returning what it held.
    pub fn take_pending(&mut self) -> Option<NodeId> {
        self.pending.take()
    }

    #[must_use]
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    pub fn select(&mut self, node: Option<NodeId>) {
        self.selected = node;
    }

    /// A set of nodes was destroyed. `destroyed` tells membership and
    /// `fallback` is where a destroyed selection should land.
    pub(crate) fn on_destroyed(
        &mut self,
        destroyed: impl Fn(NodeId) -> bool,
        fallback: Option<NodeId>,
    ) {
        if self.pending.is_some_and(&destroyed) {
            self.pending = None;
        }
        if self.selected.is_some_and(&destroyed) {
            self.selected = fallback;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slot: u32) -> NodeId {
        NodeId::from_raw_parts(slot, 0)
    }

    #[test]
    fn pending_slot_round_trip() {
        let mut focus = FocusContinuity::new();
        assert_eq!(focus.pending(), None);
        focus.set_pending(id(4));
        assert_eq!(focus.pending(), Some(id(4)));
        assert_eq!(focus.take_pending(), Some(id(4)));
        assert_eq!(focus.pending(), None);
    }

    #[test]
    fn destroy_clears_pending_and_moves_selection() {
        let mut focus = FocusContinuity::new();
        focus.set_pending(id(5));
        focus.select(Some(id(5)));
        focus.on_destroyed(|n| n == id(5), Some(id(2)));
        assert_eq!(focus.pending(), None);
        assert_eq!(focus.selected(), Some(id(2)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut focus = FocusContinuity::new();
        focus.set_pending(id(1));
        focus.select(Some(id(2)));
        focus.reset();
        assert_eq!(focus, FocusContinuity::default());
    }
}
