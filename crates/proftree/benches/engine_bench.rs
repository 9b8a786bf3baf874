//! Benchmarks for the tree engine.
//!
//! Run with: cargo bench -p proftree

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use proftree::{MemorySource, TreeConfig, TreeEngine};
use std::hint::black_box;

/// Synthetic profile: `events` top-level rows, each with `fanout` functions,
/// each function with `fanout` lines. Tags are dense `u32`s.
fn profile(events: u32, fanout: u32) -> MemorySource<u32> {
    let mut source = MemorySource::new().with_children(None, 0..events);
    let mut next = events;
    for event in 0..events {
        let functions: Vec<u32> = (next..next + fanout).collect();
        next += fanout;
        for &function in &functions {
            source = source.with_children(Some(function), next..next + fanout);
            next += fanout;
        }
        source = source.with_children(Some(event), functions);
    }
    source
}

// ============================================================================
// Bind
// ============================================================================

fn bench_bind(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/bind");

    for (events, fanout) in [(10, 10), (50, 20)] {
        let source = profile(events, fanout);
        group.bench_with_input(
            BenchmarkId::new("top_level", format!("{events}x{fanout}")),
            &source,
            |b, source| {
                b.iter(|| {
                    let mut engine = TreeEngine::new();
                    engine.bind(source.clone());
                    black_box(engine.row_count());
                })
            },
        );
        group.bench_with_input(
            BenchmarkId::new("depth_2", format!("{events}x{fanout}")),
            &source,
            |b, source| {
                b.iter(|| {
                    let config = TreeConfig::default().with_initial_expand_depth(2);
                    let mut engine = TreeEngine::with_config(config);
                    engine.bind(source.clone());
                    black_box(engine.row_count());
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Expand / collapse
// ============================================================================

fn bench_toggle(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/toggle");

    for fanout in [10, 50] {
        let mut engine = TreeEngine::new();
        engine.bind(profile(20, fanout));
        let root = engine.root();
        engine.expand_all(root).unwrap();
        // Middle event, so the projection shifts rows on both sides.
        let event = engine.rows().iter().nth(engine.row_count() / 2).unwrap();
        let event = engine.ancestors(event).unwrap().first().copied().unwrap_or(event);

        group.bench_with_input(
            BenchmarkId::new("collapse_expand", fanout),
            &(),
            |b, _| {
                b.iter(|| {
                    engine.collapse(event).unwrap();
                    engine.expand(event).unwrap();
                    black_box(engine.row_count());
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Live changes
// ============================================================================

fn bench_live_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/live");

    group.bench_function("add_remove_top_level", |b| {
        let mut engine = TreeEngine::new();
        engine.bind(profile(20, 20));
        let root = engine.root();
        engine.expand_all(root).unwrap();
        let fresh = u32::MAX;

        b.iter(|| {
            let source = engine.source_mut().unwrap();
            source.insert(None, 10, fresh);
            engine.sync();
            engine.source_mut().unwrap().remove(None, 10);
            engine.sync();
            black_box(engine.row_count());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_bind, bench_toggle, bench_live_add);
criterion_main!(benches);
