//! Harness configuration from `PROFTREE_*` environment variables.

/// Shape of the synthetic profile and the session switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Top-level profiler events (cycles, cache misses, ...).
    pub events: u32,
    /// Functions sampled per event.
    pub functions: u32,
    /// Annotated source lines per function.
    pub lines: u32,
    /// Disassembly entries per source line.
    pub asm: u32,
    /// Levels expanded at bind time.
    pub expand_depth: usize,
    pub self_check: bool,
    /// Dump the final rows to stdout.
    pub print_rows: bool,
    /// JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            events: 4,
            functions: 8,
            lines: 6,
            asm: 3,
            expand_depth: 0,
            self_check: true,
            print_rows: true,
            log_json: false,
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup. Unset or unparsable values fall back
    /// to the defaults; sizes are clamped so a typo cannot build a profile
    /// that does not fit in memory.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| {
            lookup(name)
                .as_deref()
                .map(str::trim)
                .and_then(|value| value.parse::<u32>().ok())
        };
        let flag = |name: &str| {
            lookup(name).and_then(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(matches!(
                    trimmed,
                    "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" | "ON"
                ))
            })
        };

        Self {
            events: number("PROFTREE_EVENTS")
                .unwrap_or(defaults.events)
                .clamp(1, 64),
            functions: number("PROFTREE_FUNCTIONS")
                .unwrap_or(defaults.functions)
                .clamp(1, 4_096),
            lines: number("PROFTREE_LINES")
                .unwrap_or(defaults.lines)
                .min(1_024),
            asm: number("PROFTREE_ASM").unwrap_or(defaults.asm).min(256),
            expand_depth: number("PROFTREE_EXPAND_DEPTH")
                .map_or(defaults.expand_depth, |depth| depth as usize)
                .min(3),
            self_check: flag("PROFTREE_SELF_CHECK").unwrap_or(defaults.self_check),
            print_rows: flag("PROFTREE_PRINT_ROWS").unwrap_or(defaults.print_rows),
            log_json: flag("PROFTREE_LOG_JSON").unwrap_or(defaults.log_json),
        }
    }
}
