//! Synthetic sampling profile exposed as a lazy, live [`TreeSource`].
//!
//! Hierarchy: event → function → source line → disassembly. Nothing below
//! the event level is stored; children are derived from the shape when the
//! engine asks, so unexpanded functions cost nothing.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

use proftree::{ChangeKind, ChildrenChange, TreeSource};

const EVENT_NAMES: [&str; 4] = ["cycles", "instructions", "cache-misses", "branch-misses"];

/// One entry of the profile hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileTag {
    Event(u32),
    Function { event: u32, function: u32 },
    Line { event: u32, function: u32, line: u32 },
    Asm {
        event: u32,
        function: u32,
        line: u32,
        offset: u32,
    },
}

impl ProfileTag {
    /// Deterministic fake sample count; deeper entries get a share of their
    /// parent's.
    #[must_use]
    pub fn samples(&self) -> u64 {
        let mix = |a: u32, b: u32| u64::from(a.wrapping_mul(2_654_435_761) ^ b) % 97 + 1;
        match *self {
            Self::Event(event) => 10_000 / u64::from(event + 1),
            Self::Function { event, function } => mix(event, function) * 40,
            Self::Line { function, line, .. } => mix(function, line) * 4,
            Self::Asm { line, offset, .. } => mix(line, offset),
        }
    }
}

impl fmt::Display for ProfileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Event(event) => {
                let name = EVENT_NAMES[event as usize % EVENT_NAMES.len()];
                write!(f, "{name} #{event}")
            }
            Self::Function { function, .. } => write!(f, "fn_{function:03}"),
            Self::Line { line, .. } => write!(f, "line {}", line * 3 + 10),
            Self::Asm { offset, .. } => write!(f, "+0x{:04x}", offset * 4),
        }
    }
}

/// Sizes of each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileShape {
    pub events: u32,
    pub functions: u32,
    pub lines: u32,
    pub asm: u32,
}

/// Profile data plus the live-notification plumbing the engine expects.
///
/// Function counts per event can change after binding (new samples arrive,
/// a filter drops an event's functions); those edits are queued for
/// subscribed parents and handed out by `poll_changes`.
#[derive(Debug)]
pub struct ProfileSource {
    shape: ProfileShape,
    functions: Vec<u32>,
    subscriptions: HashMap<Option<ProfileTag>, usize>,
    pending: Vec<ChildrenChange<ProfileTag>>,
    queries: Cell<usize>,
}

impl ProfileSource {
    #[must_use]
    pub fn new(shape: ProfileShape) -> Self {
        Self {
            shape,
            functions: vec![shape.functions; shape.events as usize],
            subscriptions: HashMap::new(),
            pending: Vec::new(),
            queries: Cell::new(0),
        }
    }

    #[must_use]
    pub fn events(&self) -> u32 {
        self.shape.events
    }

    /// Total `children()` calls so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.get()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().sum()
    }

    /// Append a newly sampled function to `event`.
    pub fn add_function(&mut self, event: u32) -> Option<ProfileTag> {
        let count = self.functions.get_mut(event as usize)?;
        let tag = ProfileTag::Function {
            event,
            function: *count,
        };
        let index = *count as usize;
        *count += 1;
        self.record(Some(ProfileTag::Event(event)), ChangeKind::Add {
            index,
            tags: vec![tag],
        });
        Some(tag)
    }

    /// Drop every function of `event`.
    pub fn clear_event(&mut self, event: u32) -> bool {
        let Some(count) = self.functions.get_mut(event as usize) else {
            return false;
        };
        *count = 0;
        self.record(Some(ProfileTag::Event(event)), ChangeKind::Reset);
        true
    }

    fn record(&mut self, parent: Option<ProfileTag>, kind: ChangeKind<ProfileTag>) {
        if self.subscriptions.contains_key(&parent) {
            self.pending.push(ChildrenChange::new(parent, kind));
        }
    }
}

impl TreeSource for ProfileSource {
    type Tag = ProfileTag;

    fn children(&self, parent: Option<&ProfileTag>) -> Vec<ProfileTag> {
        self.queries.set(self.queries.get() + 1);
        let ProfileShape { lines, asm, .. } = self.shape;
        match parent.copied() {
            None => (0..self.shape.events).map(ProfileTag::Event).collect(),
            Some(ProfileTag::Event(event)) => {
                let count = self.functions.get(event as usize).copied().unwrap_or(0);
                (0..count)
                    .map(|function| ProfileTag::Function { event, function })
                    .collect()
            }
            Some(ProfileTag::Function { event, function }) => (0..lines)
                .map(|line| ProfileTag::Line {
                    event,
                    function,
                    line,
                })
                .collect(),
            Some(ProfileTag::Line {
                event,
                function,
                line,
            }) => (0..asm)
                .map(|offset| ProfileTag::Asm {
                    event,
                    function,
                    line,
                    offset,
                })
                .collect(),
            Some(ProfileTag::Asm { .. }) => Vec::new(),
        }
    }

    fn has_children(&self, tag: &ProfileTag) -> bool {
        match *tag {
            ProfileTag::Event(event) => self
                .functions
                .get(event as usize)
                .is_some_and(|&count| count > 0),
            ProfileTag::Function { .. } => self.shape.lines > 0,
            ProfileTag::Line { .. } => self.shape.asm > 0,
            ProfileTag::Asm { .. } => false,
        }
    }

    fn subscribe(&mut self, parent: Option<&ProfileTag>) {
        *self.subscriptions.entry(parent.copied()).or_insert(0) += 1;
    }

    fn unsubscribe(&mut self, parent: Option<&ProfileTag>) {
        let key = parent.copied();
        if let Some(count) = self.subscriptions.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.subscriptions.remove(&key);
            }
        }
    }

    fn poll_changes(&mut self) -> Vec<ChildrenChange<ProfileTag>> {
        std::mem::take(&mut self.pending)
    }
}
