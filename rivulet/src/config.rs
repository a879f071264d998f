// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-wide engine configuration.
//!
//! The engine reads its configuration through [`config()`]. An application may
//! install its own [`Config`] exactly once, before the first stream or unit is
//! created; after the first read the configuration is frozen.

use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Engine-wide feature flags. The defaults track `debug_assertions` so that
/// development builds validate aggressively and release builds stay lean.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Wrap every user-supplied subscriber in a lifecycle validator that
    /// asserts signal ordering (one subscribe first, at most one terminal,
    /// nothing after cancel).
    pub validate_subscriptions: bool,
    /// Internal assertions. When off, protocol violations are logged and
    /// tolerated, but the protocol guarantees are forfeit.
    pub check_invariants: bool,
    /// Record human-readable debug names on streams and tasks.
    pub names_enabled: bool,
    /// When the executor detects a runaway, drain the task queue instead of
    /// leaving the pending tasks queued for the next activation.
    pub purge_tasks_when_runaway_detected: bool,
    /// Round budget for the executor. See [`Executor`].
    ///
    /// [`Executor`]: crate::sched::Executor
    pub max_rounds: usize,
}

pub const DEFAULT_MAX_ROUNDS: usize = 100;

impl Default for Config {
    fn default() -> Self {
        Self {
            validate_subscriptions: cfg!(debug_assertions),
            check_invariants: cfg!(debug_assertions),
            names_enabled: cfg!(debug_assertions),
            purge_tasks_when_runaway_detected: true,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl Config {
    /// Install this configuration process-wide.
    ///
    /// Returns whether the install took effect. The first caller wins; the
    /// defaults win if the engine is used before anything is installed.
    pub fn install(self) -> bool { CONFIG.set(self).is_ok() }
}

/// The active engine configuration.
pub fn config() -> &'static Config { CONFIG.get_or_init(Config::default) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_track_debug_assertions() {
        let config = Config::default();
        assert_eq!(config.validate_subscriptions, cfg!(debug_assertions));
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        assert!(config.purge_tasks_when_runaway_detected);
    }
}
