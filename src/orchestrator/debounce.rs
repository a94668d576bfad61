//! Delay selection for scheduled reset fetches.

use std::time::Duration;

use crate::config::DebounceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceInput {
    /// No fetch has completed yet in this orchestrator's lifetime.
    pub is_initial_load: bool,
    /// A snapshot is on screen and has not yet been consumed by this policy.
    pub snapshot_served: bool,
}

/// - first load after a snapshot: refresh right away in the background
/// - first load with nothing on screen: short delay
/// - any later change: full edit debounce
pub fn select_delay(input: DebounceInput, cfg: &DebounceConfig) -> Duration {
    let ms = match input {
        DebounceInput {
            is_initial_load: true,
            snapshot_served: true,
        } => cfg.snapshot_ms,
        DebounceInput {
            is_initial_load: true,
            snapshot_served: false,
        } => cfg.initial_ms,
        DebounceInput {
            is_initial_load: false,
            ..
        } => cfg.edit_ms,
    };
    Duration::from_millis(ms)
}
