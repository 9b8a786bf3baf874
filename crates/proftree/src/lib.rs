#![forbid(unsafe_code)]

//! Lazy hierarchical-to-flat tree projection.
//!
//! `proftree` keeps an arbitrarily deep hierarchy (for a sampling profiler:
//! events, functions, source lines, disassembly) alongside a flat,
//! index-addressable list of the nodes that are currently visible. A list
//! surface renders [`FlatRows`] directly; the [`TreeEngine`] keeps it in step
//! with expansion, collapse and live edits without ever rebuilding it from
//! scratch.
//!
//! Children are materialized from a [`TreeSource`] the first time their
//! parent is expanded. Collapsing hides a subtree but keeps it in memory, so
//! re-expanding does not query the source again.
//!
//! # Example
//!
//! ```
//! use proftree::{FocusRequest, MemorySource, TreeConfig, TreeEngine};
//!
//! let source = MemorySource::new()
//!     .with_children(None, ["cycles", "cache-misses"])
//!     .with_children(Some("cycles"), ["main", "parse"]);
//!
//! let mut engine = TreeEngine::with_config(TreeConfig::default().with_self_check(true));
//! engine.bind(source);
//! assert_eq!(engine.row_count(), 2);
//!
//! let cycles = engine.row(0).unwrap();
//! engine.expand(cycles).unwrap();
//! let parse = engine.row(2).unwrap();
//! assert_eq!(engine.focus(parse).unwrap(), FocusRequest::Row(2));
//! ```
//!
//! # Feature flags
//!
//! - `tracing`: emit spans and events through the `tracing` crate. Without
//!   it every log call compiles to nothing.

mod logging;

pub mod children;
pub mod config;
pub mod engine;
pub mod error;
pub mod focus;
pub mod node;
pub mod rows;
pub mod source;
pub mod traverse;

pub use children::ChildList;
pub use config::TreeConfig;
pub use engine::TreeEngine;
pub use error::{InvariantViolation, TreeError};
pub use focus::{FocusContinuity, FocusRequest};
pub use node::{Node, NodeFlags, NodeId};
pub use rows::{FlatRows, ObserverId, RowsChange};
pub use source::{ChangeKind, ChildrenChange, MemorySource, TreeSource};
pub use traverse::VisibleDescendants;
