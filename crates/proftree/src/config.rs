//! Engine configuration.

/// Tunables for a [`TreeEngine`](crate::TreeEngine).
///
/// ```
/// use proftree::TreeConfig;
///
/// let config = TreeConfig::default()
///     .with_initial_expand_depth(1)
///     .with_self_check(true);
/// assert_eq!(config.initial_expand_depth(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeConfig {
    initial_expand_depth: usize,
    self_check: bool,
}

impl TreeConfig {
    /// Number of levels below the root expanded when a source is bound.
    ///
    /// `0` shows only the top level. The extra levels are materialized
    /// before the first row is published, so binding still produces a single
    /// projection change.
    #[must_use]
    pub fn with_initial_expand_depth(mut self, depth: usize) -> Self {
        self.initial_expand_depth = depth;
        self
    }

    /// Validate every invariant after each mutation. Violations are logged,
    /// and panic in debug builds.
    ///
    /// Costs a full walk per mutation; meant for tests and debugging.
    #[must_use]
    pub fn with_self_check(mut self, enabled: bool) -> Self {
        self.self_check = enabled;
        self
    }

    #[must_use]
    pub const fn initial_expand_depth(&self) -> usize {
        self.initial_expand_depth
    }

    #[must_use]
    pub const fn self_check(&self) -> bool {
        self.self_check
    }
}
