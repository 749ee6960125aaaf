// =============================================================================
// Signals Module
// =============================================================================
//
// Signal construction for the admission engine:
// - Fusion of order-flow imbalance and volume-delta z-scores

pub mod fusion;

pub use fusion::{FusionResult, FusionScorer};
