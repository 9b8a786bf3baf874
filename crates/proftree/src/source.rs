//! Data source capability and live change notifications.
//!
//! The engine never walks caller data itself. It asks a [`TreeSource`] for a
//! node's children the first time that node is expanded, and for a cheap
//! "could this have children" hint when building each child. Live sources
//! additionally queue [`ChildrenChange`] notifications for the parents the
//! engine subscribed to; [`TreeEngine::sync`](crate::TreeEngine::sync) drains
//! them on the engine's thread.
//!
//! A source populated on a worker thread must hand its notifications to the
//! engine's thread itself (for example through a channel feeding
//! [`TreeEngine::apply_change`](crate::TreeEngine::apply_change)); the engine
//! performs no marshaling.

use std::collections::HashMap;
use std::hash::Hash;

/// Capability pair the engine needs from a hierarchy, plus optional live
/// notification hooks.
pub trait TreeSource {
    /// Opaque payload stored on each node. Compared only for identity.
    type Tag: PartialEq;

    /// Ordered children of `parent`; `None` asks for the top level.
    ///
    /// Called once per node per child generation. The returned order becomes
    /// the sibling order until a change notification says otherwise.
    fn children(&self, parent: Option<&Self::Tag>) -> Vec<Self::Tag>;

    /// Cheap, side-effect free existence check. May be called repeatedly.
    fn has_children(&self, tag: &Self::Tag) -> bool;

    /// The engine materialized `parent`'s children and wants notifications
    /// for them.
    fn subscribe(&mut self, _parent: Option<&Self::Tag>) {}

    /// Counterpart of [`subscribe`](Self::subscribe), issued when the node is
    /// removed, its children are rebuilt, or the source is unbound.
    fn unsubscribe(&mut self, _parent: Option<&Self::Tag>) {}

    /// Hand over queued notifications. Snapshot sources never have any.
    fn poll_changes(&mut self) -> Vec<ChildrenChange<Self::Tag>> {
        Vec::new()
    }
}

/// A change to one parent's child list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildrenChange<T> {
    /// Parent whose children changed; `None` for the top level.
    pub parent: Option<T>,
    pub kind: ChangeKind<T>,
}

impl<T> ChildrenChange<T> {
    #[must_use]
    pub fn new(parent: Option<T>, kind: ChangeKind<T>) -> Self {
        Self { parent, kind }
    }
}

/// What happened to the child list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind<T> {
    /// `tags` were inserted so the first now sits at `index`.
    Add { index: usize, tags: Vec<T> },
    /// `count` children starting at `index` were removed.
    Remove { index: usize, count: usize },
    /// The child at `from` moved to `to`.
    Move { from: usize, to: usize },
    /// Children starting at `index` were replaced by `tags`.
    Replace { index: usize, tags: Vec<T> },
    /// The list changed wholesale.
    Reset,
}

/// Mutable in-memory hierarchy with live notifications.
///
/// Every mutation is recorded as a [`ChildrenChange`] when, and only when,
/// the parent currently has at least one subscriber. Subscriptions are
/// reference counted because equal tags may sit at several places in the
/// engine's tree.
#[derive(Debug, Clone)]
pub struct MemorySource<T: Eq + Hash> {
    top: Vec<T>,
    children: HashMap<T, Vec<T>>,
    subscriptions: HashMap<Option<T>, usize>,
    pending: Vec<ChildrenChange<T>>,
}

impl<T: Eq + Hash> Default for MemorySource<T> {
    fn default() -> Self {
        Self {
            top: Vec::new(),
            children: HashMap::new(),
            subscriptions: HashMap::new(),
            pending: Vec::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> MemorySource<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the children of `parent` without recording a change.
    #[must_use]
    pub fn with_children(mut self, parent: Option<T>, children: impl IntoIterator<Item = T>) -> Self {
        *self.list_mut(parent.as_ref()) = children.into_iter().collect();
        self
    }

    /// Current children of `parent`.
    #[must_use]
    pub fn list(&self, parent: Option<&T>) -> &[T] {
        match parent {
            None => &self.top,
            Some(tag) => self.children.get(tag).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    /// Insert `tag` at `index` under `parent`. `index` is clamped to the end.
    pub fn insert(&mut self, parent: Option<T>, index: usize, tag: T) {
        let list = self.list_mut(parent.as_ref());
        let index = index.min(list.len());
        list.insert(index, tag.clone());
        self.record(parent, ChangeKind::Add {
            index,
            tags: vec![tag],
        });
    }

    /// Append `tag` under `parent`.
    pub fn push(&mut self, parent: Option<T>, tag: T) {
        let index = self.list(parent.as_ref()).len();
        self.insert(parent, index, tag);
    }

    /// Remove the child at `index` under `parent`, if there is one.
    pub fn remove(&mut self, parent: Option<T>, index: usize) -> Option<T> {
        let list = self.list_mut(parent.as_ref());
        if index >= list.len() {
            return None;
        }
        let removed = list.remove(index);
        self.record(parent, ChangeKind::Remove { index, count: 1 });
        Some(removed)
    }

    /// Move a child within `parent`'s list.
    pub fn move_child(&mut self, parent: Option<T>, from: usize, to: usize) -> bool {
        let list = self.list_mut(parent.as_ref());
        if from >= list.len() || to >= list.len() {
            return false;
        }
        let tag = list.remove(from);
        list.insert(to, tag);
        self.record(parent, ChangeKind::Move { from, to });
        true
    }

    /// Replace the child at `index` under `parent`.
    pub fn replace(&mut self, parent: Option<T>, index: usize, tag: T) -> Option<T> {
        let list = self.list_mut(parent.as_ref());
        let slot = list.get_mut(index)?;
        let old = std::mem::replace(slot, tag.clone());
        self.record(parent, ChangeKind::Replace {
            index,
            tags: vec![tag],
        });
        Some(old)
    }

    /// Swap `parent`'s whole child list.
    pub fn reset(&mut self, parent: Option<T>, children: impl IntoIterator<Item = T>) {
        *self.list_mut(parent.as_ref()) = children.into_iter().collect();
        self.record(parent, ChangeKind::Reset);
    }

    /// Whether the engine currently listens to `parent`.
    #[must_use]
    pub fn is_subscribed(&self, parent: Option<&T>) -> bool {
        self.subscriptions.contains_key(&parent.cloned())
    }

    /// Total live subscriptions, counting duplicates.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().sum()
    }

    /// Notifications queued and not yet polled.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    fn list_mut(&mut self, parent: Option<&T>) -> &mut Vec<T> {
        match parent {
            None => &mut self.top,
            Some(tag) => self.children.entry(tag.clone()).or_default(),
        }
    }

    fn record(&mut self, parent: Option<T>, kind: ChangeKind<T>) {
        if self.subscriptions.contains_key(&parent) {
            self.pending.push(ChildrenChange { parent, kind });
        }
    }
}

impl<T: Clone + Eq + Hash> TreeSource for MemorySource<T> {
    type Tag = T;

    fn children(&self, parent: Option<&T>) -> Vec<T> {
        self.list(parent).to_vec()
    }

    fn has_children(&self, tag: &T) -> bool {
        self.children.get(tag).is_some_and(|list| !list.is_empty())
    }

    fn subscribe(&mut self, parent: Option<&T>) {
        *self.subscriptions.entry(parent.cloned()).or_insert(0) += 1;
    }

    fn unsubscribe(&mut self, parent: Option<&T>) {
        let key = parent.cloned();
        if let Some(count) = self.subscriptions.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.subscriptions.remove(&key);
            }
        }
    }

    fn poll_changes(&mut self) -> Vec<ChildrenChange<T>> {
        std::mem::take(&mut self.pending)
    }
}
