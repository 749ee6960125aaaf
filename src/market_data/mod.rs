// =============================================================================
// Market Data Module
// =============================================================================
//
// Per-symbol market activity feeding the regime market trigger:
// - Rolling activity window with a flagged snapshot
// - Winsorized robust statistics

pub mod activity;
pub mod robust;

pub use activity::{ActivitySample, MarketActivityEstimator, MarketActivitySnapshot, SnapshotQuality};
