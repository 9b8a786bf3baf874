#![forbid(unsafe_code)]

//! Logging and tracing support.
//!
//! With the `tracing` feature enabled this module re-exports the `tracing`
//! macros the engine uses. Without it, no-op macros with the same names are
//! provided so call sites compile unchanged and cost nothing.
//!
//! Call sites import from here rather than from `tracing` directly:
//!
//! ```ignore
//! use crate::logging::{debug, debug_span};
//!
//! let _span = debug_span!("proftree.expand", node = %id).entered();
//! debug!(children = 3, "materialized");
//! ```

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, debug_span, error, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop_macros {
    /// No-op debug macro when tracing is disabled.
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op debug_span macro when tracing is disabled.
    macro_rules! debug_span {
        ($($arg:tt)*) => {
            $crate::logging::NoopSpan
        };
    }

    /// No-op error macro when tracing is disabled.
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    /// No-op trace macro when tracing is disabled.
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op warn macro when tracing is disabled. Defined under another name
    /// because importing a local `warn` is ambiguous with the built-in lint
    /// attribute.
    macro_rules! warn_noop {
        ($($arg:tt)*) => {};
    }

    #[allow(unused_imports)]
    pub(crate) use {debug, debug_span, error, trace, warn_noop as warn};
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use noop_macros::{debug, debug_span, error, trace, warn};

/// A no-op span for when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub struct NoopSpan;

#[cfg(not(feature = "tracing"))]
impl NoopSpan {
    /// Enter the no-op span (does nothing).
    pub fn enter(&self) -> NoopGuard {
        NoopGuard
    }

    /// Enter the no-op span by value (does nothing).
    pub fn entered(self) -> NoopGuard {
        NoopGuard
    }
}

/// A no-op span guard.
#[cfg(not(feature = "tracing"))]
pub struct NoopGuard;
