// =============================================================================
// Guards Module
// =============================================================================
//
// Stateful per-symbol guards consulted by the gating pipeline:
// - Debounce: consecutive-direction confirmation and flip re-arm margin
// - Cooldown: post-exit quiet period fed by execution-layer notifications

pub mod cooldown;
pub mod debounce;

pub use cooldown::{notify_exit, CooldownTracker, ExitListener};
pub use debounce::{DebounceGuard, DebounceState, DebounceVerdict};
