#![forbid(unsafe_code)]

//! Flat row projection.
//!
//! [`FlatRows`] is the index-addressable sequence of visible nodes that a
//! list surface iterates. Consumers only ever get a shared reference; the
//! engine mutates it through whole-range operations so every logical tree
//! operation reaches observers as one [`RowsChange`].
//!
//! # Operations
//!
//! | Operation | Time | Notifications |
//! |-----------|------|---------------|
//! | `get(i)` | O(1) | - |
//! | `index_of(id)` | O(n) | - |
//! | `insert_range(at, rows)` | O(n + k) | 1 (none when `k == 0`) |
//! | `remove_range(at, k)` | O(n) | 1 (none when `k == 0`) |
//! | `clear()` | O(n) | 1 (none when already empty) |

use std::fmt;

use crate::node::NodeId;

/// One batched change to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsChange<'a> {
    /// `rows` now occupy `start..start + rows.len()`.
    Inserted { start: usize, rows: &'a [NodeId] },
    /// `rows` used to occupy `start..start + rows.len()`.
    Removed { start: usize, rows: &'a [NodeId] },
    /// Every row was dropped; `len` rows existed before.
    Cleared { len: usize },
}

impl RowsChange<'_> {
    /// Net change in row count.
    #[must_use]
    pub fn delta(&self) -> isize {
        match self {
            Self::Inserted { rows, .. } => rows.len() as isize,
            Self::Removed { rows, .. } => -(rows.len() as isize),
            Self::Cleared { len } => -(*len as isize),
        }
    }
}

/// Handle returned by [`FlatRows::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&RowsChange<'_>)>;

/// Ordered sequence of currently visible nodes.
#[derive(Default)]
pub struct FlatRows {
    rows: Vec<NodeId>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl fmt::Debug for FlatRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatRows")
            .field("rows", &self.rows)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl FlatRows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Node shown at `row`.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<NodeId> {
        self.rows.get(row).copied()
    }

    /// Row currently showing `id`, by identity.
    #[must_use]
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.rows.iter().position(|&row| row == id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.rows.contains(&id)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.rows
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.rows.iter().copied()
    }

    /// Register a change observer. Observers run in registration order after
    /// each batched change.
    pub fn subscribe(&mut self, observer: impl FnMut(&RowsChange<'_>) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Drop an observer. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Insert `rows` so the first lands at `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at > len`.
    pub(crate) fn insert_range(&mut self, at: usize, rows: Vec<NodeId>) {
        assert!(
            at <= self.rows.len(),
            "row insert at {at} past end {}",
            self.rows.len()
        );
        if rows.is_empty() {
            return;
        }
        let count = rows.len();
        self.rows.splice(at..at, rows);
        let change = RowsChange::Inserted {
            start: at,
            rows: &self.rows[at..at + count],
        };
        notify(&mut self.observers, &change);
    }

    /// Remove `count` rows starting at `at`, returning them.
    ///
    /// # Panics
    ///
    /// Panics if `at + count > len`.
    pub(crate) fn remove_range(&mut self, at: usize, count: usize) -> Vec<NodeId> {
        assert!(
            at + count <= self.rows.len(),
            "row removal {at}..{} past end {}",
            at + count,
            self.rows.len()
        );
        if count == 0 {
            return Vec::new();
        }
        let removed: Vec<NodeId> = self.rows.drain(at..at + count).collect();
        notify(
            &mut self.observers,
            &RowsChange::Removed {
                start: at,
                rows: &removed,
            },
        );
        removed
    }

    pub(crate) fn clear(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        self.rows.clear();
        notify(&mut self.observers, &RowsChange::Cleared { len });
    }
}

fn notify(observers: &mut [(ObserverId, Observer)], change: &RowsChange<'_>) {
    for (_, observer) in observers.iter_mut() {
        observer(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ids(n: u32) -> Vec<NodeId> {
        (0..n).map(|slot| NodeId::from_raw_parts(slot, 0)).collect()
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Inserted(usize, usize),
        Removed(usize, usize),
        Cleared(usize),
    }

    fn record(rows: &mut FlatRows) -> Rc<RefCell<Vec<Seen>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        rows.subscribe(move |change| {
            let seen = match *change {
                RowsChange::Inserted { start, rows } => Seen::Inserted(start, rows.len()),
                RowsChange::Removed { start, rows } => Seen::Removed(start, rows.len()),
                RowsChange::Cleared { len } => Seen::Cleared(len),
            };
            sink.borrow_mut().push(seen);
        });
        log
    }

    #[test]
    fn insert_range_is_one_notification() {
        let mut rows = FlatRows::new();
        let log = record(&mut rows);
        let n = ids(4);
        rows.insert_range(0, vec![n[0], n[3]]);
        rows.insert_range(1, vec![n[1], n[2]]);

        assert_eq!(rows.as_slice(), n.as_slice());
        assert_eq!(
            *log.borrow(),
            vec![Seen::Inserted(0, 2), Seen::Inserted(1, 2)]
        );
    }

    #[test]
    fn remove_range_returns_removed_rows() {
        let mut rows = FlatRows::new();
        let n = ids(5);
        rows.insert_range(0, n.clone());
        let log = record(&mut rows);

        let removed = rows.remove_range(1, 3);
        assert_eq!(removed, n[1..4].to_vec());
        assert_eq!(rows.as_slice(), &[n[0], n[4]]);
        assert_eq!(*log.borrow(), vec![Seen::Removed(1, 3)]);
    }

    #[test]
    fn empty_ranges_are_silent() {
        let mut rows = FlatRows::new();
        let log = record(&mut rows);
        rows.insert_range(0, Vec::new());
        assert!(rows.remove_range(0, 0).is_empty());
        rows.clear();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn clear_reports_previous_len() {
        let mut rows = FlatRows::new();
        rows.insert_range(0, ids(3));
        let log = record(&mut rows);
        rows.clear();
        assert!(rows.is_empty());
        assert_eq!(*log.borrow(), vec![Seen::Cleared(3)]);
    }

    #[test]
    fn index_of_is_identity_lookup() {
        let mut rows = FlatRows::new();
        let n = ids(3);
        rows.insert_range(0, n.clone());
        assert_eq!(rows.index_of(n[2]), Some(2));
        assert_eq!(rows.index_of(NodeId::from_raw_parts(2, 1)), None);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let mut rows = FlatRows::new();
        let log = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&log);
        let id = rows.subscribe(move |_| *sink.borrow_mut() += 1);
        rows.insert_range(0, ids(1));
        assert!(rows.unsubscribe(id));
        assert!(!rows.unsubscribe(id));
        rows.insert_range(0, ids(1));
        assert_eq!(*log.borrow(), 1);
        assert_eq!(rows.observer_count(), 0);
    }

    #[test]
    fn delta_matches_change_size() {
        let n = ids(2);
        assert_eq!(RowsChange::Inserted { start: 0, rows: &n }.delta(), 2);
        assert_eq!(RowsChange::Removed { start: 0, rows: &n }.delta(), -2);
        assert_eq!(RowsChange::Cleared { len: 5 }.delta(), -5);
    }

    #[test]
    #[should_panic(expected = "past end")]
    fn insert_past_end_panics() {
        let mut rows = FlatRows::new();
        rows.insert_range(1, ids(1));
    }
}
