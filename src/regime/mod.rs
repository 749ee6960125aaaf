// =============================================================================
// Regime Module
// =============================================================================
//
// Coarse market-activity classification (active / quiet):
// - Trading schedule with midnight-wrapping time windows
// - Hysteresis state machine over schedule and market-activity triggers

pub mod manager;
pub mod schedule;

pub use manager::{RegimeEvaluation, RegimeManager, RegimeState, RegimeTransition};
pub use schedule::Schedule;
