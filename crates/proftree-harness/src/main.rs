#![forbid(unsafe_code)]

//! Reference explorer session for `proftree`.
//!
//! Builds a synthetic sampling profile on a worker thread, hands it to the
//! main thread, binds it to a [`TreeEngine`] and drives a scripted session:
//! expand, collapse, focus a hidden line, reveal it, absorb live samples and
//! a dropped event. Prints the final rows and one JSON summary line.
//!
//! Configuration comes from `PROFTREE_*` variables (see [`HarnessConfig`])
//! and log filtering from `RUST_LOG`.

mod config;
mod profile;

use std::cell::Cell;
use std::error::Error;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use proftree::{FocusRequest, RowsChange, TreeConfig, TreeEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::HarnessConfig;
use crate::profile::{ProfileShape, ProfileSource, ProfileTag};

type Engine = TreeEngine<ProfileSource>;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the profile off the main thread, the way results are parsed in the
/// background, and marshal the finished source back.
fn load_profile(shape: ProfileShape) -> Result<ProfileSource, Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("profile-loader".into())
        .spawn(move || {
            let source = ProfileSource::new(shape);
            // The receiver only disappears if main already bailed out.
            let _ = tx.send(source);
        })?;
    let source = rx.recv()?;
    worker
        .join()
        .map_err(|_| "profile loader thread panicked")?;
    Ok(source)
}

fn find_row(engine: &Engine, tag: ProfileTag) -> Option<proftree::NodeId> {
    engine
        .rows()
        .iter()
        .find(|&id| engine.tag(id) == Some(&tag))
}

fn run_session(engine: &mut Engine) -> Result<(), Box<dyn Error>> {
    let event = find_row(engine, ProfileTag::Event(0)).ok_or("profile has no events")?;
    engine.expand(event)?;

    let hot = ProfileTag::Function {
        event: 0,
        function: 0,
    };
    let function = find_row(engine, hot).ok_or("first event has no functions")?;
    engine.expand(function)?;
    let line = engine.next_visible(function)?;
    engine.select(Some(function))?;
    engine.collapse(event)?;
    info!(selected = ?engine.selected_row(), "collapsed first event");

    if let Some(line) = line.filter(|&id| engine.level(id).ok() == Some(2)) {
        match engine.focus(line)? {
            FocusRequest::Pending => {
                let row = engine.reveal(line)?;
                info!(row, resolved = ?engine.resolve_pending_focus(), "revealed pending focus");
                engine.clear_pending_focus();
            }
            FocusRequest::Row(row) => warn!(row, "line unexpectedly visible"),
        }
    }

    if let Some(source) = engine.source_mut() {
        source.add_function(0);
        let last = source.events().saturating_sub(1);
        if last > 0 {
            source.clear_event(last);
        }
    }
    let applied = engine.sync();
    info!(applied, rows = engine.row_count(), "live changes applied");

    let root = engine.root();
    let last = engine.rows().iter().last();
    if let Some(last) = last {
        engine.expand_all(last)?;
    }
    engine.collapse_all(root)?;
    engine.expand(event)?;
    Ok(())
}

fn print_rows(engine: &Engine) {
    for id in engine.rows().iter() {
        let (Some(tag), Ok(level)) = (engine.tag(id), engine.level(id)) else {
            continue;
        };
        let marker = match engine.node(id) {
            Some(node) if node.is_expanded() && node.is_expandable() => "v",
            Some(node) if node.is_expandable() => ">",
            _ => " ",
        };
        let indent = "  ".repeat(usize::try_from(level).unwrap_or(0));
        println!("{indent}{marker} {tag} ({} samples)", tag.samples());
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = HarnessConfig::from_env();
    init_tracing(config.log_json);
    info!(?config, "starting");

    let started = Instant::now();
    let source = load_profile(ProfileShape {
        events: config.events,
        functions: config.functions,
        lines: config.lines,
        asm: config.asm,
    })?;

    let tree_config = TreeConfig::default()
        .with_initial_expand_depth(config.expand_depth)
        .with_self_check(config.self_check);
    let mut engine = Engine::with_config(tree_config);

    let changes = Rc::new(Cell::new(0usize));
    let rows_touched = Rc::new(Cell::new(0usize));
    {
        let changes = Rc::clone(&changes);
        let rows_touched = Rc::clone(&rows_touched);
        engine.subscribe_rows(move |change| {
            changes.set(changes.get() + 1);
            let touched = match *change {
                RowsChange::Inserted { rows, .. } | RowsChange::Removed { rows, .. } => rows.len(),
                RowsChange::Cleared { len } => len,
            };
            rows_touched.set(rows_touched.get() + touched);
        });
    }

    engine.bind(source);
    run_session(&mut engine)?;

    if config.print_rows {
        print_rows(&engine);
    }

    let invariants = match engine.check_invariants() {
        Ok(()) => "ok".to_string(),
        Err(violation) => violation.to_string(),
    };
    let rows = engine.row_count();
    let source = engine.unbind().ok_or("engine lost its source")?;
    let summary = serde_json::json!({
        "rows": rows,
        "row_changes": changes.get(),
        "rows_touched": rows_touched.get(),
        "children_queries": source.queries(),
        "leaked_subscriptions": source.subscription_count(),
        "invariants": invariants,
        "elapsed_us": started.elapsed().as_micros() as u64,
    });
    println!("{summary}");
    Ok(())
}
