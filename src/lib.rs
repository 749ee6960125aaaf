// =============================================================================
// Signal Gate: regime-aware signal admission engine
// =============================================================================
//
// Consumes per-symbol feature rows (order-flow imbalance and volume-delta
// z-scores plus data-quality fields) and decides, tick by tick, whether the
// fused signal is admitted. Every decision carries its full list of
// rejection reasons.
//
//   FeatureRow ──► FusionScorer ──► RegimeManager ──► gates ──► Signal
//                                        ▲               ▲
//                  MarketActivityEstimator     DebounceGuard / CooldownTracker
//
// Library only: the caller owns the feature stream, execution and sinks.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
pub mod config;
pub mod decision_log;
pub mod gating;
pub mod guards;
pub mod market_data;
pub mod regime;
pub mod runner;
pub mod signals;
pub mod types;

pub use config::{CompiledConfig, EngineConfig};
pub use decision_log::{DecisionLog, DecisionStats};
pub use gating::GatingPipeline;
pub use guards::{notify_exit, CooldownTracker, DebounceGuard, ExitListener};
pub use market_data::{ActivitySample, MarketActivityEstimator, MarketActivitySnapshot};
pub use regime::{RegimeManager, Schedule};
pub use runner::SymbolRouter;
pub use signals::FusionScorer;
pub use types::{Direction, FeatureRow, Regime, RejectReason, Side, Signal};
