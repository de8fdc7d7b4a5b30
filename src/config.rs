use std::env;

/// Slots per heap page. mruby-style runtimes default to 1024; smaller pages
/// waste less per allocation but grow the page-list traversal sweep does.
pub const PAGE_SIZE: usize = 1024;

/// Reserved for incremental variants; unused by this stop-the-world collector.
pub const STEP_SIZE: usize = 1024;

const DEFAULT_ARENA_SIZE: usize = 2048;

/// Embedder-tunable knobs for a [`crate::Runtime`].
///
/// Mirrors the shape of `otterlang`'s `GcConfig::from_env` — a plain struct
/// with a `from_env` constructor, no config-file parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Slots per page. Defaults to [`PAGE_SIZE`].
    pub page_size: usize,
    /// Capacity of the arena protection stack.
    pub arena_size: usize,
    /// Reserved for a future incremental variant; accepted, never consulted.
    pub step_size: usize,
    /// Whether allocation is allowed to trigger collection automatically.
    /// Equivalent to starting the runtime with `gc_disabled` cleared.
    pub auto_collect: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            page_size: PAGE_SIZE,
            arena_size: DEFAULT_ARENA_SIZE,
            step_size: STEP_SIZE,
            auto_collect: true,
        }
    }
}

impl GcConfig {
    /// Build a config from `DYNRT_GC_PAGE_SIZE` / `DYNRT_GC_ARENA_SIZE` /
    /// `DYNRT_GC_AUTO_COLLECT`, falling back to defaults for anything unset
    /// or unparseable.
    pub fn from_env() -> Self {
        let default = GcConfig::default();
        GcConfig {
            page_size: env_usize("DYNRT_GC_PAGE_SIZE").unwrap_or(default.page_size),
            arena_size: env_usize("DYNRT_GC_ARENA_SIZE").unwrap_or(default.arena_size),
            step_size: default.step_size,
            auto_collect: env::var("DYNRT_GC_AUTO_COLLECT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.auto_collect),
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::GcConfig;

    #[test]
    fn defaults_match_module_constants() {
        let cfg = GcConfig::default();
        assert_eq!(cfg.page_size, super::PAGE_SIZE);
        assert_eq!(cfg.step_size, super::STEP_SIZE);
        assert!(cfg.auto_collect);
    }
}
