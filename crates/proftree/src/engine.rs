#![forbid(unsafe_code)]

//! Tree engine: keeps the node hierarchy and the flat row projection in step.
//!
//! # State machine per node
//!
//! | From | Request | Effect on rows |
//! |------|---------|----------------|
//! | collapsed, never queried | expand | query source, insert the new children after the node's row |
//! | collapsed, queried before | expand | re-insert the hidden subtree's visible rows as they were |
//! | expanded | collapse | remove the node's visible descendants; children stay in memory |
//!
//! Live notifications: `Add` and `Remove` are applied incrementally at the
//! row position derived from the current projection. `Move`, `Replace` and
//! `Reset` drop the affected node's children and rebuild them from the
//! source, re-querying lazily if the node is collapsed.
//!
//! Before any `children()` query the engine drains the source's queue into
//! its own backlog and notes how much of it the query already reflects.
//! [`sync`](TreeEngine::sync) skips those notifications for that node, so a
//! rebuilt child list never receives the same edit twice.
//!
//! # Invariants
//!
//! 1. A non-root node is a row iff every ancestor is expanded.
//! 2. Rows are the pre-order walk of the visible forest.
//! 3. Sibling indices are dense and zero-based after every public call.
//! 4. `children()` is asked at most once per node per child generation.
//! 5. The root is always expanded, never a row, and lives as long as the
//!    engine.
//!
//! All entry points, including [`sync`](TreeEngine::sync), must run on one
//! thread and must not be re-entered from a row observer.

use std::fmt;

use crate::config::TreeConfig;
use crate::error::{InvariantViolation, TreeError};
use crate::focus::{FocusContinuity, FocusRequest};
use crate::logging::{debug, debug_span, error, trace, warn};
use crate::node::{Node, NodeArena, NodeFlags, NodeId};
use crate::rows::{FlatRows, ObserverId, RowsChange};
use crate::source::{ChangeKind, ChildrenChange, TreeSource};
use crate::traverse::VisibleDescendants;

/// Lazy tree with a flat, index-addressable projection of its visible nodes.
///
/// ```
/// use proftree::{MemorySource, TreeEngine};
///
/// let source = MemorySource::new()
///     .with_children(None, ["A", "B"])
///     .with_children(Some("A"), ["A1", "A2"]);
///
/// let mut engine = TreeEngine::new();
/// engine.bind(source);
/// assert_eq!(engine.row_tags(), vec![&"A", &"B"]);
///
/// let a = engine.row(0).unwrap();
/// engine.expand(a).unwrap();
/// assert_eq!(engine.row_tags(), vec![&"A", &"A1", &"A2", &"B"]);
///
/// engine.collapse(a).unwrap();
/// assert_eq!(engine.row_tags(), vec![&"A", &"B"]);
/// ```
pub struct TreeEngine<S: TreeSource> {
    source: Option<S>,
    nodes: NodeArena<S::Tag>,
    root: NodeId,
    rows: FlatRows,
    focus: FocusContinuity,
    config: TreeConfig,
    /// Nodes currently subscribed at the source, in subscription order.
    subscribed: Vec<NodeId>,
    /// Notifications drained from the source but not applied yet. Entries
    /// are taken while [`sync`](Self::sync) walks them.
    backlog: Vec<Option<ChildrenChange<S::Tag>>>,
    /// `(node, n)`: the node's children were queried after `backlog[..n]`
    /// was queued.
    queried: Vec<(NodeId, usize)>,
}

impl<S: TreeSource> fmt::Debug for TreeEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEngine")
            .field("bound", &self.source.is_some())
            .field("nodes", &self.nodes.len())
            .field("rows", &self.rows.len())
            .field("subscribed", &self.subscribed.len())
            .field("backlog", &self.backlog.len())
            .field("focus", &self.focus)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: TreeSource> Default for TreeEngine<S> {
    fn default() -> Self {
        Self::with_config(TreeConfig::default())
    }
}

impl<S: TreeSource> TreeEngine<S> {
    /// Unbound engine holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: TreeConfig) -> Self {
        let (nodes, root) = NodeArena::with_root();
        Self {
            source: None,
            nodes,
            root,
            rows: FlatRows::new(),
            focus: FocusContinuity::new(),
            config,
            subscribed: Vec::new(),
            backlog: Vec::new(),
            queried: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> TreeConfig {
        self.config
    }

    // ------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------

    /// Replace the source, discarding the whole tree and projection, then
    /// populate the top level (plus `initial_expand_depth` levels) as a
    /// single row insertion. Returns the previous source.
    pub fn bind(&mut self, source: S) -> Option<S> {
        let _span = debug_span!("proftree.bind").entered();
        let previous = self.teardown();
        self.source = Some(source);

        let depth = self.config.initial_expand_depth();
        if let Err(_err) = self.materialize_levels(depth) {
            warn!(error = %_err, "bind stopped early");
        }
        let rows: Vec<NodeId> = self.nodes.visible_descendants(self.root).collect();
        debug!(rows = rows.len(), depth, "bound source");
        self.rows.insert_range(0, rows);
        self.after_mutation("bind");
        previous
    }

    /// Drop the source and every node below the root.
    pub fn unbind(&mut self) -> Option<S> {
        let _span = debug_span!("proftree.unbind").entered();
        let previous = self.teardown();
        self.after_mutation("unbind");
        previous
    }

    #[must_use]
    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    /// Mutable access for live sources. Call [`sync`](Self::sync) afterwards
    /// to apply whatever the source queued.
    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.source.is_some()
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// The root sentinel. Never a row.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The flat projection.
    #[must_use]
    pub fn rows(&self) -> &FlatRows {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<NodeId> {
        self.rows.get(index)
    }

    /// Current row of `id`, `None` if hidden, removed or the root.
    #[must_use]
    pub fn row_of(&self, id: NodeId) -> Option<usize> {
        if id == self.root || !self.nodes.contains(id) {
            return None;
        }
        self.rows.index_of(id)
    }

    /// Tags of every row, front to back.
    #[must_use]
    pub fn row_tags(&self) -> Vec<&S::Tag> {
        self.rows
            .iter()
            .filter_map(|id| self.nodes.get(id).and_then(Node::tag))
            .collect()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node<S::Tag>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn tag(&self, id: NodeId) -> Option<&S::Tag> {
        self.nodes.get(id).and_then(Node::tag)
    }

    /// Live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Observe batched projection changes.
    pub fn subscribe_rows(
        &mut self,
        observer: impl FnMut(&RowsChange<'_>) + 'static,
    ) -> ObserverId {
        self.rows.subscribe(observer)
    }

    pub fn unsubscribe_rows(&mut self, id: ObserverId) -> bool {
        self.rows.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Depth of `id`; the root is `-1` and top-level rows are `0`.
    pub fn level(&self, id: NodeId) -> Result<isize, TreeError> {
        self.require(id)?;
        Ok(self.nodes.level(id))
    }

    /// Whether every ancestor of `id` is expanded.
    pub fn is_visible(&self, id: NodeId) -> Result<bool, TreeError> {
        self.require(id)?;
        Ok(self.nodes.is_visible(id))
    }

    pub fn is_expandable(&self, id: NodeId) -> Result<bool, TreeError> {
        Ok(self.require(id)?.is_expandable())
    }

    pub fn previous_sibling(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        self.require(id)?;
        Ok(self.nodes.previous_sibling(id))
    }

    pub fn next_sibling(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        self.require(id)?;
        Ok(self.nodes.next_sibling(id))
    }

    /// Next node in projection order.
    pub fn next_visible(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        self.require(id)?;
        Ok(self.nodes.next_visible(id))
    }

    /// Lazy walk over `id`'s visible descendants in projection order.
    pub fn visible_descendants(
        &self,
        id: NodeId,
    ) -> Result<VisibleDescendants<'_, S::Tag>, TreeError> {
        self.require(id)?;
        Ok(self.nodes.visible_descendants(id))
    }

    /// Rows spanned by `id`'s descendants while it is expanded.
    pub fn visible_descendant_count(&self, id: NodeId) -> Result<usize, TreeError> {
        Ok(self.visible_descendants(id)?.count())
    }

    /// Ancestors of `id` from the top level down, excluding the root and
    /// `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        self.require(id)?;
        let mut chain = Vec::new();
        let mut cursor = self.nodes[id].parent;
        while let Some(parent) = cursor {
            if parent == self.root {
                break;
            }
            chain.push(parent);
            cursor = self.nodes[parent].parent;
        }
        chain.reverse();
        Ok(chain)
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<(), TreeError> {
        if expanded {
            self.expand(id)
        } else {
            self.collapse(id)
        }
    }

    /// Expand `id`. The first expansion queries the source; later ones put
    /// the retained subtree back unchanged. No-op if already expanded.
    pub fn expand(&mut self, id: NodeId) -> Result<(), TreeError> {
        if self.require(id)?.is_expanded() {
            return Ok(());
        }
        let _span = debug_span!("proftree.expand", node = %id).entered();
        self.restructure(id, |engine| {
            engine.nodes[id].flags.insert(NodeFlags::EXPANDED);
            if !engine.nodes[id].is_expanded_once() {
                engine.materialize(id)?;
            }
            Ok(())
        })?;
        self.after_mutation("expand");
        Ok(())
    }

    /// Collapse `id`, hiding its descendants without destroying them.
    pub fn collapse(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            self.require(id)?;
            return Err(TreeError::RootIsFixed);
        }
        if !self.require(id)?.is_expanded() {
            return Ok(());
        }
        let _span = debug_span!("proftree.collapse", node = %id).entered();
        self.restructure(id, |engine| {
            engine.nodes[id].flags.remove(NodeFlags::EXPANDED);
            Ok(())
        })?;
        self.after_mutation("collapse");
        Ok(())
    }

    pub fn toggle(&mut self, id: NodeId) -> Result<(), TreeError> {
        let expanded = self.require(id)?.is_expanded();
        self.set_expanded(id, !expanded)
    }

    /// Expand `id` and its whole subtree, materializing every level.
    ///
    /// Rows change by at most one removal and one insertion.
    pub fn expand_all(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.require(id)?;
        let _span = debug_span!("proftree.expand_all", node = %id).entered();
        self.restructure(id, |engine| {
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                engine.nodes[current].flags.insert(NodeFlags::EXPANDED);
                if !engine.nodes[current].is_expanded_once() {
                    engine.materialize(current)?;
                }
                stack.extend(engine.nodes[current].children.iter().rev());
            }
            Ok(())
        })?;
        self.after_mutation("expand_all");
        Ok(())
    }

    /// Collapse `id` and every materialized descendant. On the root this
    /// leaves only the top level visible.
    pub fn collapse_all(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.require(id)?;
        let _span = debug_span!("proftree.collapse_all", node = %id).entered();
        let root = self.root;
        self.restructure(id, |engine| {
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                if current != root {
                    engine.nodes[current].flags.remove(NodeFlags::EXPANDED);
                }
                stack.extend(engine.nodes[current].children.iter());
            }
            Ok(())
        })?;
        self.after_mutation("collapse_all");
        Ok(())
    }

    /// Re-ask the source whether `id` could have children.
    pub fn refresh_has_children(&mut self, id: NodeId) -> Result<bool, TreeError> {
        self.require(id)?;
        let has = self.query_has_children(id);
        Ok(has)
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Insert a new child built from `tag` at `index` under `parent`.
    ///
    /// Returns `None` when `parent` has not been materialized yet; the entry
    /// will come from the source on first expansion. Locating the row costs
    /// a projection scan, so bulk changes should go through a reset instead.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        tag: S::Tag,
        index: usize,
    ) -> Result<Option<NodeId>, TreeError> {
        let node = self.require(parent)?;
        if !node.is_expanded_once() {
            self.nodes[parent].flags.insert(NodeFlags::HAS_CHILDREN);
            return Ok(None);
        }
        let len = node.children.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange { parent, index, len });
        }
        let ids = self.insert_tags(parent, index, vec![tag])?;
        self.after_mutation("insert_child");
        Ok(ids.first().copied())
    }

    /// Destroy the child at `index` under `parent` with its subtree.
    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Result<(), TreeError> {
        let len = self.require(parent)?.children.len();
        if index >= len {
            return Err(TreeError::IndexOutOfRange { parent, index, len });
        }
        self.remove_children(parent, index, 1)?;
        self.after_mutation("remove_child");
        Ok(())
    }

    /// Swap the child at `index` for a fresh node built from `tag`. A
    /// selection on the old node moves to the new one.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        index: usize,
        tag: S::Tag,
    ) -> Result<NodeId, TreeError> {
        let len = self.require(parent)?.children.len();
        if index >= len {
            return Err(TreeError::IndexOutOfRange { parent, index, len });
        }
        let old = self.nodes[parent].children.as_slice()[index];
        let row = self.rows.index_of(old);
        if let Some(row) = row {
            let count = 1 + self.nodes.visible_descendants(old).count();
            self.rows.remove_range(row, count);
        }

        let has = self.source_has_children(&tag);
        let new = self.nodes.alloc(Node::new(tag, has));
        self.nodes.replace_child_at(parent, index, new)?;
        self.destroy_subtree(old);
        let nodes = &self.nodes;
        self.focus.on_destroyed(|n| !nodes.contains(n), Some(new));

        if let Some(row) = row {
            self.rows.insert_range(row, vec![new]);
        }
        self.retarget_selection();
        self.after_mutation("replace_child");
        Ok(new)
    }

    /// Move `node` (with its subtree) under `new_parent` at `index`.
    ///
    /// Returns `Ok(false)` without changes when `node` already is a direct
    /// child of `new_parent`. A target whose children were never queried is
    /// materialized first so the source's entries are not lost; `index` is
    /// checked against the materialized list, and the target stays
    /// materialized when it is rejected.
    pub fn reparent(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        index: usize,
    ) -> Result<bool, TreeError> {
        if node == self.root {
            return Err(TreeError::RootIsFixed);
        }
        let current_parent = self.require(node)?.parent;
        self.require(new_parent)?;
        if current_parent == Some(new_parent) {
            return Ok(false);
        }
        if self.nodes.is_in_subtree(new_parent, node) {
            return Err(TreeError::CycleDetected { node, new_parent });
        }
        if !self.nodes[new_parent].is_expanded_once() {
            self.restructure(new_parent, |engine| engine.materialize(new_parent))?;
        }
        let len = self.nodes[new_parent].children.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange {
                parent: new_parent,
                index,
                len,
            });
        }

        if let Some(row) = self.rows.index_of(node) {
            let count = 1 + self.nodes.visible_descendants(node).count();
            self.rows.remove_range(row, count);
        }
        self.nodes.insert_child(new_parent, index, node)?;
        self.nodes[new_parent].flags.insert(NodeFlags::HAS_CHILDREN);
        if let Some(row) = self.child_row(new_parent, index) {
            let mut moved = vec![node];
            moved.extend(self.nodes.visible_descendants(node));
            self.rows.insert_range(row, moved);
        }
        self.retarget_selection();
        self.after_mutation("reparent");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Live notifications
    // ------------------------------------------------------------------

    /// Drain the source's queued notifications and apply them in order.
    /// Returns how many were processed.
    ///
    /// A node whose children were queried after a notification was queued
    /// already reflects it and is skipped for that notification. This
    /// includes nodes rebuilt earlier in the same batch.
    pub fn sync(&mut self) -> usize {
        self.stash_changes();
        if self.backlog.is_empty() {
            return 0;
        }
        let count = self.backlog.len();
        let _span = debug_span!("proftree.sync", changes = count).entered();
        let mut position = 0;
        while position < self.backlog.len() {
            if let Some(change) = self.backlog[position].take() {
                self.dispatch(position, change);
            }
            position += 1;
        }
        self.backlog.clear();
        self.queried.clear();
        count
    }

    /// Apply one notification to every subscribed node whose tag matches the
    /// change's parent.
    ///
    /// For notifications delivered outside the source's queue, e.g. over a
    /// channel from a loader thread. The change counts as newer than every
    /// query made so far.
    pub fn apply_change(&mut self, change: ChildrenChange<S::Tag>) {
        let position = self.backlog.len();
        self.dispatch(position, change);
    }

    fn dispatch(&mut self, position: usize, change: ChildrenChange<S::Tag>) {
        let ChildrenChange { parent, kind } = change;
        let queried = &self.queried;
        let nodes = &self.nodes;
        let targets: Vec<NodeId> = self
            .subscribed
            .iter()
            .copied()
            .filter(|&id| {
                nodes.get(id).is_some_and(|node| node.tag() == parent.as_ref())
                    && !queried
                        .iter()
                        .any(|&(node, upto)| node == id && position < upto)
            })
            .collect();
        if targets.is_empty() {
            trace!("change for unsubscribed parent ignored");
            return;
        }

        let mut kind = Some(kind);
        for target in targets {
            if !self.nodes.contains(target) {
                continue;
            }
            // Tags are not clonable; the first target consumes the
            // notification and later ones rebuild from the source.
            let result = match kind.take() {
                Some(kind) => self.apply_kind(target, kind),
                None => self.resync(target),
            };
            if let Err(_err) = result {
                error!(error = %_err, node = %target, "live change failed");
            }
        }
        self.after_mutation("apply_change");
    }

    fn apply_kind(&mut self, target: NodeId, kind: ChangeKind<S::Tag>) -> Result<(), TreeError> {
        if !self.nodes[target].is_expanded_once() {
            // Children will be queried fresh on expansion; only the hint moves.
            self.query_has_children(target);
            return Ok(());
        }
        let len = self.nodes[target].children.len();
        match kind {
            ChangeKind::Add { index, tags } if index <= len => {
                debug!(node = %target, index, added = tags.len(), "live add");
                self.insert_tags(target, index, tags)?;
                Ok(())
            }
            ChangeKind::Remove { index, count } if index <= len && count <= len - index => {
                debug!(node = %target, index, count, "live remove");
                self.remove_children(target, index, count)
            }
            ChangeKind::Add { .. } | ChangeKind::Remove { .. } => {
                warn!(node = %target, "change out of range for current children, rebuilding");
                self.resync(target)
            }
            ChangeKind::Move { .. } | ChangeKind::Replace { .. } | ChangeKind::Reset => {
                self.resync(target)
            }
        }
    }

    // ------------------------------------------------------------------
    // Focus and selection
    // ------------------------------------------------------------------

    /// Ask for `id` to receive focus. If it has no row yet it becomes the
    /// pending focus.
    pub fn focus(&mut self, id: NodeId) -> Result<FocusRequest, TreeError> {
        if id == self.root {
            return Err(TreeError::RootIsFixed);
        }
        self.require(id)?;
        match self.rows.index_of(id) {
            Some(row) => {
                if self.focus.pending() == Some(id) {
                    self.focus.take_pending();
                }
                Ok(FocusRequest::Row(row))
            }
            None => {
                self.focus.set_pending(id);
                Ok(FocusRequest::Pending)
            }
        }
    }

    /// Expand every ancestor of `id` so it gets a row, and return that row.
    pub fn reveal(&mut self, id: NodeId) -> Result<usize, TreeError> {
        if id == self.root {
            return Err(TreeError::RootIsFixed);
        }
        for ancestor in self.ancestors(id)? {
            self.expand(ancestor)?;
        }
        self.rows
            .index_of(id)
            .ok_or(TreeError::StaleNode { node: id })
    }

    #[must_use]
    pub fn pending_focus(&self) -> Option<NodeId> {
        self.focus.pending()
    }

    /// Row of the pending focus node once it has one.
    #[must_use]
    pub fn resolve_pending_focus(&self) -> Option<usize> {
        self.focus.pending().and_then(|id| self.rows.index_of(id))
    }

    /// The consumer honored the pending focus (or gave up on it).
    pub fn clear_pending_focus(&mut self) -> Option<NodeId> {
        self.focus.take_pending()
    }

    /// Select `id`, or clear the selection. A hidden node hands the
    /// selection to its nearest visible ancestor.
    pub fn select(&mut self, id: Option<NodeId>) -> Result<(), TreeError> {
        if let Some(id) = id {
            if id == self.root {
                return Err(TreeError::RootIsFixed);
            }
            self.require(id)?;
        }
        self.focus.select(id);
        self.retarget_selection();
        Ok(())
    }

    #[must_use]
    pub fn selected(&self) -> Option<NodeId> {
        self.focus.selected()
    }

    #[must_use]
    pub fn selected_row(&self) -> Option<usize> {
        self.focus.selected().and_then(|id| self.rows.index_of(id))
    }

    // ------------------------------------------------------------------
    // Consistency
    // ------------------------------------------------------------------

    /// Verify parent links, sibling indices, reachability and the projection
    /// against a fresh recursive walk.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if !self.nodes[self.root].is_expanded() {
            return Err(InvariantViolation::RootCollapsed);
        }

        let mut reachable = 1;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            for (index, child) in self.nodes[id].children.iter().enumerate() {
                let Some(node) = self.nodes.get(child) else {
                    return Err(InvariantViolation::ParentMismatch {
                        node: child,
                        expected: Some(id),
                        actual: None,
                    });
                };
                if node.parent != Some(id) {
                    return Err(InvariantViolation::ParentMismatch {
                        node: child,
                        expected: Some(id),
                        actual: node.parent,
                    });
                }
                if node.index != index {
                    return Err(InvariantViolation::SiblingIndexMismatch {
                        node: child,
                        expected: index,
                        actual: node.index,
                    });
                }
                reachable += 1;
                stack.push(child);
            }
        }
        if reachable != self.nodes.len() {
            return Err(InvariantViolation::UnreachableNodes {
                count: self.nodes.len() - reachable,
            });
        }

        let flagged = self
            .nodes
            .iter()
            .filter(|(_, node)| node.flags.contains(NodeFlags::SUBSCRIBED))
            .count();
        let stale = self.subscribed.iter().any(|&id| {
            !self
                .nodes
                .get(id)
                .is_some_and(|node| node.flags.contains(NodeFlags::SUBSCRIBED))
        });
        if stale || flagged != self.subscribed.len() {
            return Err(InvariantViolation::SubscriptionMismatch {
                tracked: self.subscribed.len(),
                flagged,
            });
        }

        let mut expected = Vec::with_capacity(self.rows.len());
        self.nodes.collect_visible_recursive(self.root, &mut expected);
        let actual = self.rows.as_slice();
        for row in 0..expected.len().max(actual.len()) {
            let want = expected.get(row).copied();
            let have = actual.get(row).copied();
            if want != have {
                return Err(InvariantViolation::RowMismatch {
                    row,
                    expected: want,
                    actual: have,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require(&self, id: NodeId) -> Result<&Node<S::Tag>, TreeError> {
        self.nodes.get(id).ok_or(TreeError::StaleNode { node: id })
    }

    fn source_has_children(&self, tag: &S::Tag) -> bool {
        self.source
            .as_ref()
            .is_some_and(|source| source.has_children(tag))
    }

    fn query_has_children(&mut self, id: NodeId) -> bool {
        let has = match self.nodes[id].tag() {
            Some(tag) => self.source_has_children(tag),
            None => true,
        };
        self.nodes[id].flags.set(NodeFlags::HAS_CHILDREN, has);
        has
    }

    /// Row where `id`'s first descendant sits while `id` is expanded, or
    /// `None` if `id` has no row.
    fn descendant_anchor(&self, id: NodeId) -> Option<usize> {
        if id == self.root {
            Some(0)
        } else {
            self.rows.index_of(id).map(|row| row + 1)
        }
    }

    /// Row a child inserted at `index` under `parent` would occupy, or `None`
    /// when `parent`'s children are not shown.
    fn child_row(&self, parent: NodeId, index: usize) -> Option<usize> {
        if !self.nodes[parent].is_expanded() {
            return None;
        }
        if index == 0 {
            return self.descendant_anchor(parent);
        }
        let previous = self.nodes[parent].children.get(index - 1)?;
        let row = self.rows.index_of(previous)?;
        Some(row + 1 + self.nodes.visible_descendants(previous).count())
    }

    /// Run `apply` with `id`'s descendant rows taken out of the projection,
    /// then put back whatever is visible afterwards. `apply` may change
    /// `id`'s own expanded flag and anything below it, never its ancestors.
    fn restructure(
        &mut self,
        id: NodeId,
        apply: impl FnOnce(&mut Self) -> Result<(), TreeError>,
    ) -> Result<(), TreeError> {
        let anchor = self.descendant_anchor(id);
        if let Some(start) = anchor
            && self.nodes[id].is_expanded()
        {
            let count = self.nodes.visible_descendants(id).count();
            self.rows.remove_range(start, count);
            trace!(node = %id, start, removed = count, "rows removed");
        }

        let result = apply(self);

        if let Some(start) = anchor
            && self.nodes[id].is_expanded()
        {
            let rows: Vec<NodeId> = self.nodes.visible_descendants(id).collect();
            trace!(node = %id, start, inserted = rows.len(), "rows inserted");
            self.rows.insert_range(start, rows);
        }
        self.retarget_selection();
        result
    }

    /// Query the source for `id`'s children and attach them. The caller is
    /// responsible for the rows.
    fn materialize(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.stash_changes();
        if !self.backlog.is_empty() {
            self.queried.push((id, self.backlog.len()));
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        let node = &self.nodes[id];
        let tags = source.children(node.tag());
        let hints: Vec<bool> = tags.iter().map(|tag| source.has_children(tag)).collect();
        let subscribe = !node.flags.contains(NodeFlags::SUBSCRIBED);
        if subscribe {
            source.subscribe(node.tag());
        }

        let count = tags.len();
        for (tag, has_children) in tags.into_iter().zip(hints) {
            let child = self.nodes.alloc(Node::new(tag, has_children));
            self.nodes.push_child(id, child)?;
        }

        let node = &mut self.nodes[id];
        node.flags.insert(NodeFlags::EXPANDED_ONCE);
        if subscribe {
            node.flags.insert(NodeFlags::SUBSCRIBED);
            self.subscribed.push(id);
        }
        if count == 0 && node.has_children() {
            // Transient data, e.g. a function that lost its samples.
            debug!(node = %id, "source reported children but returned none");
            node.flags.remove(NodeFlags::HAS_CHILDREN);
        }
        debug!(node = %id, children = count, "materialized");
        Ok(())
    }

    /// Materialize the root and `depth` expanded levels below it without
    /// touching the rows.
    fn materialize_levels(&mut self, depth: usize) -> Result<(), TreeError> {
        self.materialize(self.root)?;
        let mut frontier = vec![self.root];
        for _ in 0..depth {
            let mut next = Vec::new();
            for id in frontier {
                let children: Vec<NodeId> = self.nodes[id].children.iter().collect();
                for child in children {
                    self.nodes[child].flags.insert(NodeFlags::EXPANDED);
                    self.materialize(child)?;
                    next.push(child);
                }
            }
            frontier = next;
        }
        Ok(())
    }

    /// Attach new nodes for `tags` starting at `index` and publish their rows.
    fn insert_tags(
        &mut self,
        parent: NodeId,
        index: usize,
        tags: Vec<S::Tag>,
    ) -> Result<Vec<NodeId>, TreeError> {
        let mut ids = Vec::with_capacity(tags.len());
        for (offset, tag) in tags.into_iter().enumerate() {
            let has = self.source_has_children(&tag);
            let id = self.nodes.alloc(Node::new(tag, has));
            self.nodes.insert_child(parent, index + offset, id)?;
            ids.push(id);
        }
        if ids.is_empty() {
            return Ok(ids);
        }
        self.nodes[parent].flags.insert(NodeFlags::HAS_CHILDREN);
        if let Some(row) = self.child_row(parent, index) {
            self.rows.insert_range(row, ids.clone());
        }
        Ok(ids)
    }

    /// Destroy `count` children of `parent` starting at `index`, dropping
    /// their rows in one range first.
    fn remove_children(
        &mut self,
        parent: NodeId,
        index: usize,
        count: usize,
    ) -> Result<(), TreeError> {
        if count == 0 {
            return Ok(());
        }
        let doomed: Vec<NodeId> = self.nodes[parent].children.as_slice()[index..index + count].to_vec();
        if let Some(first_row) = self.rows.index_of(doomed[0]) {
            let total: usize = doomed
                .iter()
                .map(|&id| 1 + self.nodes.visible_descendants(id).count())
                .sum();
            self.rows.remove_range(first_row, total);
        }
        for _ in 0..count {
            self.nodes.remove_child_at(parent, index)?;
        }
        for &id in &doomed {
            self.destroy_subtree(id);
        }

        let fallback = if parent != self.root {
            Some(parent)
        } else {
            let siblings = &self.nodes[parent].children;
            siblings
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| siblings.get(i)))
        };
        let nodes = &self.nodes;
        self.focus.on_destroyed(|n| !nodes.contains(n), fallback);
        self.retarget_selection();
        Ok(())
    }

    /// Drop `id`'s children and rebuild them from the source. A collapsed
    /// node is left unmaterialized and re-queries on its next expansion.
    fn resync(&mut self, id: NodeId) -> Result<(), TreeError> {
        debug!(node = %id, "rebuilding children from source");
        self.restructure(id, |engine| {
            let children = engine.nodes[id].children.take_all();
            for child in children {
                engine.destroy_subtree(child);
            }
            let fallback = (id != engine.root).then_some(id);
            let nodes = &engine.nodes;
            engine.focus.on_destroyed(|n| !nodes.contains(n), fallback);

            engine.nodes[id].flags.remove(NodeFlags::EXPANDED_ONCE);
            engine.query_has_children(id);
            if engine.nodes[id].is_expanded() {
                engine.materialize(id)?;
            }
            Ok(())
        })
    }

    /// Unsubscribe and free `top` and everything below it. `top` must
    /// already be detached from its parent's list, or that list cleared.
    fn destroy_subtree(&mut self, top: NodeId) {
        let mut doomed = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            doomed.push(id);
            stack.extend(self.nodes[id].children.iter());
        }
        if let Some(source) = self.source.as_mut() {
            for &id in &doomed {
                let node = &self.nodes[id];
                if node.flags.contains(NodeFlags::SUBSCRIBED) {
                    source.unsubscribe(node.tag());
                }
            }
        }
        trace!(node = %top, freed = doomed.len(), "subtree destroyed");
        for id in doomed {
            self.nodes.free(id);
        }
        let nodes = &self.nodes;
        self.subscribed.retain(|&id| nodes.contains(id));
    }

    /// Move the source's queued notifications into the backlog so a fresh
    /// query can be ordered against them.
    fn stash_changes(&mut self) {
        if let Some(source) = self.source.as_mut() {
            self.backlog.extend(source.poll_changes().into_iter().map(Some));
        }
    }

    /// Remove every node below the root, unsubscribing from the old source,
    /// and clear the projection.
    fn teardown(&mut self) -> Option<S> {
        self.rows.clear();
        let children = self.nodes[self.root].children.take_all();
        for child in children {
            self.destroy_subtree(child);
        }
        let root = &mut self.nodes[self.root];
        if root.flags.contains(NodeFlags::SUBSCRIBED)
            && let Some(source) = self.source.as_mut()
        {
            source.unsubscribe(None);
        }
        root.flags = NodeFlags::EXPANDED;
        self.subscribed.clear();
        self.backlog.clear();
        self.queried.clear();
        self.focus.reset();
        self.source.take()
    }

    /// Move a selection that lost its row to the nearest visible ancestor.
    fn retarget_selection(&mut self) {
        let Some(mut current) = self.focus.selected() else {
            return;
        };
        if !self.nodes.contains(current) {
            self.focus.select(None);
            return;
        }
        while !self.nodes.is_visible(current) {
            match self.nodes[current].parent {
                Some(parent) if parent != self.root => current = parent,
                _ => {
                    self.focus.select(None);
                    return;
                }
            }
        }
        self.focus.select(Some(current));
    }

    fn after_mutation(&self, operation: &'static str) {
        if !self.config.self_check() {
            return;
        }
        if let Err(violation) = self.check_invariants() {
            error!(operation, %violation, "tree invariant violated");
            if cfg!(debug_assertions) {
                panic!("tree invariant violated after {operation}: {violation}");
            }
        }
    }
}
