//! Error types for rejected tree operations and failed consistency checks.

use std::fmt;

use crate::node::NodeId;

/// Reasons the engine rejects an operation.
///
/// Every variant is a caller bug. Operations validate their preconditions
/// before touching any state, so a rejected call leaves the tree and the
/// projection exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The id refers to a node that was removed (or never existed here).
    StaleNode { node: NodeId },
    /// A child position outside `0..=len` (insert) or `0..len` (remove).
    IndexOutOfRange {
        parent: NodeId,
        index: usize,
        len: usize,
    },
    /// The root sentinel cannot be collapsed, removed or moved.
    RootIsFixed,
    /// Moving a node below itself would create a cycle.
    CycleDetected { node: NodeId, new_parent: NodeId },
    /// Replacing a slot with a node that is already a sibling in that list.
    AlreadyChild { node: NodeId, parent: NodeId },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleNode { node } => write!(f, "node {node} is not part of this tree"),
            Self::IndexOutOfRange { parent, index, len } => write!(
                f,
                "child index {index} out of range for node {parent} with {len} children"
            ),
            Self::RootIsFixed => f.write_str("the root node cannot be collapsed, removed or moved"),
            Self::CycleDetected { node, new_parent } => write!(
                f,
                "cannot move node {node} below its own descendant {new_parent}"
            ),
            Self::AlreadyChild { node, parent } => {
                write!(f, "node {node} is already a child of node {parent}")
            }
        }
    }
}

impl std::error::Error for TreeError {}

/// A broken structural invariant found by
/// [`TreeEngine::check_invariants`](crate::TreeEngine::check_invariants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A child's parent link does not point back at the list that holds it.
    ParentMismatch {
        node: NodeId,
        expected: Option<NodeId>,
        actual: Option<NodeId>,
    },
    /// A child's cached sibling index disagrees with its list position.
    SiblingIndexMismatch {
        node: NodeId,
        expected: usize,
        actual: usize,
    },
    /// The projection differs from the pre-order walk of the visible forest.
    RowMismatch {
        row: usize,
        expected: Option<NodeId>,
        actual: Option<NodeId>,
    },
    /// The root lost its expanded flag.
    RootCollapsed,
    /// Live arena entries that are not reachable from the root.
    UnreachableNodes { count: usize },
    /// The engine's subscription list disagrees with the node flags.
    SubscriptionMismatch { tracked: usize, flagged: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentMismatch {
                node,
                expected,
                actual,
            } => write!(
                f,
                "node {node} parent mismatch: expected {expected:?}, found {actual:?}"
            ),
            Self::SiblingIndexMismatch {
                node,
                expected,
                actual,
            } => write!(
                f,
                "node {node} sibling index mismatch: expected {expected}, found {actual}"
            ),
            Self::RowMismatch {
                row,
                expected,
                actual,
            } => write!(
                f,
                "row {row} mismatch: expected {expected:?}, found {actual:?}"
            ),
            Self::RootCollapsed => f.write_str("root node is not expanded"),
            Self::UnreachableNodes { count } => {
                write!(f, "{count} nodes are allocated but unreachable from the root")
            }
            Self::SubscriptionMismatch { tracked, flagged } => write!(
                f,
                "{tracked} subscriptions tracked but {flagged} nodes are subscribed"
            ),
        }
    }
}

impl std::error::Error for InvariantViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_node() {
        let node = NodeId::from_raw_parts(3, 1);
        let msg = TreeError::StaleNode { node }.to_string();
        assert!(msg.contains("3v1"), "{msg}");
    }

    #[test]
    fn index_error_reports_bounds() {
        let parent = NodeId::from_raw_parts(0, 0);
        let msg = TreeError::IndexOutOfRange {
            parent,
            index: 7,
            len: 2,
        }
        .to_string();
        assert!(msg.contains('7') && msg.contains('2'), "{msg}");
    }

    #[test]
    fn errors_are_std_errors() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<TreeError>();
        assert_error::<InvariantViolation>();
    }
}
