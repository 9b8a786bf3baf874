//! Property-based invariant tests for the tree engine.
//!
//! Random hierarchies are driven through random sequences of expansion,
//! collapse and live source edits. Edits queue at the source and are only
//! applied by an explicit sync step, so several can pile up and expansions
//! can re-query a parent while its edits are still queued. After every step:
//!
//! 1. `check_invariants` passes (parent links, dense sibling indices, rows
//!    equal the pre-order walk of the visible forest).
//! 2. A node has a row iff every ancestor is expanded.
//! 3. Once nothing is queued, every visible, materialized node mirrors its
//!    source child list.
//!
//! Separately:
//!
//! 4. Expand then collapse (or collapse then expand) restores the exact rows.
//! 5. Without live edits, `children()` runs at most once per tag.

use std::cell::RefCell;
use std::collections::HashMap;

use proftree::{ChildrenChange, MemorySource, NodeId, TreeConfig, TreeEngine, TreeSource};
use proptest::prelude::*;
use proptest::sample::Index;

// ── Helpers ─────────────────────────────────────────────────────────────

/// Parent choice for each tag: `0` puts it at the top level, `k` under tag
/// `k - 1`. Only earlier tags can be parents, so the result is a forest.
fn source_strategy() -> impl Strategy<Value = MemorySource<u32>> {
    prop::collection::vec(any::<Index>(), 1..40).prop_map(|parents| {
        let mut lists: HashMap<Option<u32>, Vec<u32>> = HashMap::new();
        for (tag, choice) in parents.iter().enumerate() {
            let tag = tag as u32;
            let pick = choice.index(tag as usize + 1);
            let parent = (pick > 0).then(|| pick as u32 - 1);
            lists.entry(parent).or_default().push(tag);
        }
        lists
            .into_iter()
            .fold(MemorySource::new(), |source, (parent, children)| {
                source.with_children(parent, children)
            })
    })
}

#[derive(Debug, Clone)]
enum Op {
    Toggle(Index),
    ExpandAll(Index),
    CollapseAll,
    LiveAdd(Index, Index),
    LiveRemove(Index, Index),
    LiveReset(Index),
    Sync,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<Index>().prop_map(Op::Toggle),
        1 => any::<Index>().prop_map(Op::ExpandAll),
        1 => Just(Op::CollapseAll),
        2 => (any::<Index>(), any::<Index>()).prop_map(|(p, i)| Op::LiveAdd(p, i)),
        2 => (any::<Index>(), any::<Index>()).prop_map(|(p, i)| Op::LiveRemove(p, i)),
        1 => any::<Index>().prop_map(Op::LiveReset),
        2 => Just(Op::Sync),
    ]
}

type Engine = TreeEngine<MemorySource<u32>>;

/// Pick a parent among the visible rows, or the top level.
fn pick_parent(engine: &Engine, index: &Index) -> Option<u32> {
    let pick = index.index(engine.row_count() + 1);
    engine
        .row(pick.checked_sub(1)?)
        .and_then(|id| engine.tag(id).copied())
}

/// Run `op`; returns whether it queued a source edit.
fn apply(engine: &mut Engine, op: &Op, fresh: &mut u32) -> bool {
    let root = engine.root();
    let count = engine.row_count();
    match op {
        Op::Toggle(index) if count > 0 => {
            let id = engine.row(index.index(count)).unwrap();
            engine.toggle(id).unwrap();
            false
        }
        Op::ExpandAll(index) if count > 0 => {
            let id = engine.row(index.index(count)).unwrap();
            engine.expand_all(id).unwrap();
            false
        }
        Op::CollapseAll => {
            engine.collapse_all(root).unwrap();
            false
        }
        Op::LiveAdd(parent, at) => {
            let parent = pick_parent(engine, parent);
            let source = engine.source_mut().unwrap();
            let len = source.list(parent.as_ref()).len();
            source.insert(parent, at.index(len + 1), *fresh);
            *fresh += 1;
            true
        }
        Op::LiveRemove(parent, at) => {
            let parent = pick_parent(engine, parent);
            let source = engine.source_mut().unwrap();
            let len = source.list(parent.as_ref()).len();
            if len > 0 {
                source.remove(parent, at.index(len));
            }
            len > 0
        }
        Op::LiveReset(parent) => {
            let parent = pick_parent(engine, parent);
            let source = engine.source_mut().unwrap();
            let mut list = source.list(parent.as_ref()).to_vec();
            list.reverse();
            source.reset(parent, list);
            true
        }
        Op::Sync => {
            engine.sync();
            false
        }
        Op::Toggle(_) | Op::ExpandAll(_) => false,
    }
}

fn assert_consistent(engine: &Engine, settled: bool) -> Result<(), TestCaseError> {
    prop_assert_eq!(engine.check_invariants(), Ok(()));

    let source = engine.source().unwrap();
    let mirror = |id: NodeId| -> Result<(), TestCaseError> {
        let node = engine.node(id).unwrap();
        if settled && node.is_expanded_once() {
            let tags: Vec<u32> = node
                .children()
                .iter()
                .map(|&child| *engine.tag(child).unwrap())
                .collect();
            prop_assert_eq!(tags.as_slice(), source.list(node.tag()));
        }
        Ok(())
    };
    mirror(engine.root())?;
    for id in engine.rows().iter() {
        let visible = engine
            .ancestors(id)
            .unwrap()
            .iter()
            .all(|&a| engine.node(a).unwrap().is_expanded());
        prop_assert!(visible, "row {id} has a collapsed ancestor");
        prop_assert_eq!(engine.is_visible(id), Ok(true));
        mirror(id)?;
    }
    Ok(())
}

/// Counts `children()` calls per parent tag.
struct CountingSource {
    inner: MemorySource<u32>,
    queries: RefCell<HashMap<Option<u32>, usize>>,
}

impl TreeSource for CountingSource {
    type Tag = u32;

    fn children(&self, parent: Option<&u32>) -> Vec<u32> {
        *self
            .queries
            .borrow_mut()
            .entry(parent.copied())
            .or_insert(0) += 1;
        self.inner.children(parent)
    }

    fn has_children(&self, tag: &u32) -> bool {
        self.inner.has_children(tag)
    }

    fn poll_changes(&mut self) -> Vec<ChildrenChange<u32>> {
        Vec::new()
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Random operation sequences keep every invariant
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn random_operations_keep_invariants(
        source in source_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..60),
        depth in 0usize..3,
    ) {
        let config = TreeConfig::default().with_initial_expand_depth(depth);
        let mut engine = Engine::with_config(config);
        engine.bind(source);
        assert_consistent(&engine, true)?;

        let mut fresh = 1_000;
        let mut queued = false;
        for op in &ops {
            queued |= apply(&mut engine, op, &mut fresh);
            if matches!(op, Op::Sync) {
                queued = false;
            }
            assert_consistent(&engine, !queued)?;
        }

        engine.sync();
        assert_consistent(&engine, true)?;

        let source = engine.unbind().unwrap();
        prop_assert_eq!(source.subscription_count(), 0);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Expand/collapse round trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn toggle_twice_restores_rows(
        source in source_strategy(),
        setup in prop::collection::vec(any::<Index>(), 0..20),
        target in any::<Index>(),
    ) {
        let mut engine = Engine::new();
        engine.bind(source);
        for index in &setup {
            let count = engine.row_count();
            if count > 0 {
                let id = engine.row(index.index(count)).unwrap();
                engine.toggle(id).unwrap();
            }
        }

        let before: Vec<NodeId> = engine.rows().iter().collect();
        let id = engine.row(target.index(before.len())).unwrap();
        engine.toggle(id).unwrap();
        engine.toggle(id).unwrap();
        prop_assert_eq!(engine.rows().as_slice(), before.as_slice());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Lazy materialization
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn children_are_queried_at_most_once(
        source in source_strategy(),
        toggles in prop::collection::vec(any::<Index>(), 0..80),
    ) {
        let mut engine = TreeEngine::new();
        engine.bind(CountingSource {
            inner: source,
            queries: RefCell::default(),
        });
        for index in &toggles {
            let count = engine.row_count();
            if count > 0 {
                let id = engine.row(index.index(count)).unwrap();
                engine.toggle(id).unwrap();
            }
        }

        let counting = engine.source().unwrap();
        for (parent, calls) in counting.queries.borrow().iter() {
            prop_assert_eq!(*calls, 1, "children({:?}) queried {} times", parent, calls);
        }
    }
}
