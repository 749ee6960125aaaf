// =============================================================================
// Engine Configuration: loaded once, validated, immutable afterwards
// =============================================================================
//
// Every tunable parameter of the admission engine lives here.  All fields
// carry `#[serde(default)]` so that a partial JSON file loads with sensible
// values for whatever it omits.
//
// Validation is strict: any malformed threshold, fusion weights that do not
// sum to 1.0, or invalid/overlapping schedule windows abort startup.  Per-row
// problems are never configuration errors.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::regime::schedule::Schedule;
use crate::types::Regime;

/// Allowed deviation of `ofi_weight + volume_delta_weight` from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Upper bound on `gating.cooldown_after_exit_sec` (one week).
pub const MAX_COOLDOWN_SEC: f64 = 7.0 * 24.0 * 3_600.0;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_ofi_weight() -> f64 {
    0.6
}

fn default_volume_delta_weight() -> f64 {
    0.4
}

fn default_neutral_band() -> f64 {
    0.25
}

fn default_strong_score() -> f64 {
    2.5
}

fn default_consistency_scale() -> f64 {
    1.0
}

fn default_activity_window_ms() -> i64 {
    5 * 60_000
}

fn default_min_samples() -> usize {
    5
}

fn default_max_samples() -> usize {
    2_048
}

fn default_winsor_pct() -> f64 {
    0.05
}

fn default_active_lookback() -> usize {
    5
}

fn default_min_active_windows() -> usize {
    3
}

fn default_min_quiet_windows() -> usize {
    5
}

fn default_evaluation_interval_ms() -> i64 {
    60_000
}

fn default_max_spread_bps() -> f64 {
    15.0
}

fn default_max_lag_sec() -> f64 {
    2.0
}

fn default_dedupe_ms() -> i64 {
    60_000
}

fn default_cooldown_after_exit_sec() -> f64 {
    120.0
}

fn default_flip_rearm_margin() -> f64 {
    0.25
}

fn default_confirm_ticks() -> u32 {
    2
}

fn default_decision_log_capacity() -> usize {
    500
}

// =============================================================================
// FusionConfig
// =============================================================================

/// Weights and classification bands for the fusion scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Weight applied to the order-flow imbalance z-score.
    #[serde(default = "default_ofi_weight")]
    pub ofi_weight: f64,

    /// Weight applied to the volume-delta z-score.
    #[serde(default = "default_volume_delta_weight")]
    pub volume_delta_weight: f64,

    /// Scores with `|score|` below this band are classified neutral.
    #[serde(default = "default_neutral_band")]
    pub neutral_band: f64,

    /// Scores at or beyond this magnitude are graded strong.
    #[serde(default = "default_strong_score")]
    pub strong_score: f64,

    /// Input magnitude at which agreement saturates toward 1.
    #[serde(default = "default_consistency_scale")]
    pub consistency_scale: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ofi_weight: default_ofi_weight(),
            volume_delta_weight: default_volume_delta_weight(),
            neutral_band: default_neutral_band(),
            strong_score: default_strong_score(),
            consistency_scale: default_consistency_scale(),
        }
    }
}

// =============================================================================
// ActivityConfig
// =============================================================================

/// Sliding-window parameters for the market activity estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Width of the sliding sample window.
    #[serde(default = "default_activity_window_ms")]
    pub window_ms: i64,

    /// Fewer samples than this yields a flagged, non-reliable snapshot.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Hard cap on retained samples per symbol.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Fraction clipped from each tail before taking the median.
    #[serde(default = "default_winsor_pct")]
    pub winsor_pct: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_ms: default_activity_window_ms(),
            min_samples: default_min_samples(),
            max_samples: default_max_samples(),
            winsor_pct: default_winsor_pct(),
        }
    }
}

// =============================================================================
// RegimeConfig
// =============================================================================

/// How the schedule and market triggers are combined into the raw trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerCombine {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl Default for TriggerCombine {
    fn default() -> Self {
        Self::And
    }
}

impl TriggerCombine {
    pub fn combine(self, schedule: bool, market: bool) -> bool {
        match self {
            Self::And => schedule && market,
            Self::Or => schedule || market,
        }
    }
}

impl std::fmt::Display for TriggerCombine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// A time-of-day window in `"HH:MM"` notation. `end` is exclusive and may be
/// earlier than `start`, in which case the window wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

/// Active trading schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Enabled weekdays (`"mon"`, `"Tuesday"`, ...). Empty means every day.
    #[serde(default)]
    pub weekdays: Vec<String>,

    /// Active time-of-day windows. Empty means always active.
    #[serde(default)]
    pub windows: Vec<WindowConfig>,

    /// Fixed offset of the schedule's timezone from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Market-activity thresholds. Every one must hold for the market trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketThresholds {
    #[serde(default)]
    pub min_trades_per_min: f64,
    #[serde(default)]
    pub min_quotes_per_sec: f64,
    #[serde(default = "default_market_max_spread_bps")]
    pub max_spread_bps: f64,
    #[serde(default)]
    pub min_volatility_bps: f64,
    #[serde(default)]
    pub min_volume_quote: f64,
}

fn default_market_max_spread_bps() -> f64 {
    f64::MAX
}

impl Default for MarketThresholds {
    fn default() -> Self {
        Self {
            min_trades_per_min: 0.0,
            min_quotes_per_sec: 0.0,
            max_spread_bps: default_market_max_spread_bps(),
            min_volatility_bps: 0.0,
            min_volume_quote: 0.0,
        }
    }
}

/// Regime state machine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    #[serde(default)]
    pub combine: TriggerCombine,

    /// Number of most recent evaluations inspected for quiet → active.
    #[serde(default = "default_active_lookback")]
    pub active_lookback: usize,

    /// True evaluations required within `active_lookback` to go active.
    #[serde(default = "default_min_active_windows")]
    pub min_active_windows: usize,

    /// Consecutive false evaluations required to go quiet.
    #[serde(default = "default_min_quiet_windows")]
    pub min_quiet_windows: usize,

    /// Minimum spacing between evaluations of one symbol. 0 = every tick.
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: i64,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub market: MarketThresholds,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            combine: TriggerCombine::default(),
            active_lookback: default_active_lookback(),
            min_active_windows: default_min_active_windows(),
            min_quiet_windows: default_min_quiet_windows(),
            evaluation_interval_ms: default_evaluation_interval_ms(),
            schedule: ScheduleConfig::default(),
            market: MarketThresholds::default(),
        }
    }
}

impl RegimeConfig {
    /// Length of the per-symbol trigger history ring.
    pub fn history_capacity(&self) -> usize {
        self.active_lookback.max(self.min_quiet_windows)
    }
}

// =============================================================================
// GatingConfig
// =============================================================================

/// Per-regime gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    /// Minimum `|score|` for the weak-signal gate.
    pub weak_signal_threshold: f64,
    /// Minimum fusion consistency.
    pub consistency_min: f64,
}

fn default_active_thresholds() -> RegimeThresholds {
    RegimeThresholds {
        weak_signal_threshold: 1.2,
        consistency_min: 0.4,
    }
}

fn default_quiet_thresholds() -> RegimeThresholds {
    RegimeThresholds {
        weak_signal_threshold: 1.8,
        consistency_min: 0.6,
    }
}

/// Gate parameters of the admission pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingConfig {
    #[serde(default = "default_active_thresholds")]
    pub active: RegimeThresholds,

    #[serde(default = "default_quiet_thresholds")]
    pub quiet: RegimeThresholds,

    /// Data-quality bound on the row spread.
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,

    /// Data-quality bound on the row lag.
    #[serde(default = "default_max_lag_sec")]
    pub max_lag_sec: f64,

    /// Window in which a second same-side admission is suppressed.
    #[serde(default = "default_dedupe_ms")]
    pub dedupe_ms: i64,

    /// Quiet period after a position exit.
    #[serde(default = "default_cooldown_after_exit_sec")]
    pub cooldown_after_exit_sec: f64,

    /// Fractional magnitude increase an opposite flip must show.
    #[serde(default = "default_flip_rearm_margin")]
    pub flip_rearm_margin: f64,

    /// Consecutive same-side ticks required before a direction confirms.
    #[serde(default = "default_confirm_ticks")]
    pub confirm_ticks: u32,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            active: default_active_thresholds(),
            quiet: default_quiet_thresholds(),
            max_spread_bps: default_max_spread_bps(),
            max_lag_sec: default_max_lag_sec(),
            dedupe_ms: default_dedupe_ms(),
            cooldown_after_exit_sec: default_cooldown_after_exit_sec(),
            flip_rearm_margin: default_flip_rearm_margin(),
            confirm_ticks: default_confirm_ticks(),
        }
    }
}

impl GatingConfig {
    /// Threshold table for the given regime.
    pub fn thresholds(&self, regime: Regime) -> &RegimeThresholds {
        match regime {
            Regime::Active => &self.active,
            Regime::Quiet => &self.quiet,
        }
    }

    pub fn cooldown_ms(&self) -> i64 {
        (self.cooldown_after_exit_sec * 1_000.0).round() as i64
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the admission engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub gating: GatingConfig,

    /// Number of recent signals retained by the decision log.
    #[serde(default = "default_decision_log_capacity")]
    pub decision_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            activity: ActivityConfig::default(),
            regime: RegimeConfig::default(),
            gating: GatingConfig::default(),
            decision_log_capacity: default_decision_log_capacity(),
        }
    }
}

/// Validated configuration plus the parsed schedule, shared read-only by
/// every component for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub engine: EngineConfig,
    pub schedule: Schedule,
}

impl EngineConfig {
    /// Load and validate configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<CompiledConfig>> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        let compiled = config
            .compile()
            .with_context(|| format!("invalid engine config in {}", path.display()))?;

        info!(
            path = %path.display(),
            combine = %compiled.engine.regime.combine,
            windows = compiled.schedule.window_count(),
            confirm_ticks = compiled.engine.gating.confirm_ticks,
            "engine config loaded"
        );

        Ok(Arc::new(compiled))
    }

    /// Validate every section and parse the schedule.
    pub fn compile(self) -> Result<CompiledConfig> {
        self.validate_fusion()?;
        self.validate_activity()?;
        self.validate_regime()?;
        self.validate_gating()?;
        ensure!(
            self.decision_log_capacity > 0,
            "decision_log_capacity must be > 0"
        );

        let schedule = Schedule::from_config(&self.regime.schedule)
            .context("invalid regime schedule")?;

        Ok(CompiledConfig {
            engine: self,
            schedule,
        })
    }

    fn validate_fusion(&self) -> Result<()> {
        let f = &self.fusion;
        for (name, w) in [
            ("ofi_weight", f.ofi_weight),
            ("volume_delta_weight", f.volume_delta_weight),
        ] {
            ensure!(w.is_finite() && w >= 0.0, "fusion.{name} must be a finite non-negative number, got {w}");
        }

        let sum = f.ofi_weight + f.volume_delta_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!(
                "fusion weights must sum to 1.0 (±{WEIGHT_SUM_TOLERANCE}), got {} + {} = {}",
                f.ofi_weight,
                f.volume_delta_weight,
                sum
            );
        }

        ensure!(
            f.neutral_band.is_finite() && f.neutral_band >= 0.0,
            "fusion.neutral_band must be >= 0"
        );
        ensure!(
            f.strong_score.is_finite() && f.strong_score > f.neutral_band,
            "fusion.strong_score ({}) must exceed neutral_band ({})",
            f.strong_score,
            f.neutral_band
        );
        ensure!(
            f.consistency_scale.is_finite() && f.consistency_scale > 0.0,
            "fusion.consistency_scale must be > 0"
        );
        Ok(())
    }

    fn validate_activity(&self) -> Result<()> {
        let a = &self.activity;
        ensure!(a.window_ms > 0, "activity.window_ms must be > 0");
        // Volatility needs at least one mid-price move.
        ensure!(a.min_samples >= 2, "activity.min_samples must be >= 2");
        ensure!(
            a.max_samples >= a.min_samples,
            "activity.max_samples ({}) must be >= min_samples ({})",
            a.max_samples,
            a.min_samples
        );
        ensure!(
            (0.0..0.5).contains(&a.winsor_pct),
            "activity.winsor_pct must be in [0, 0.5), got {}",
            a.winsor_pct
        );
        Ok(())
    }

    fn validate_regime(&self) -> Result<()> {
        let r = &self.regime;
        ensure!(r.active_lookback >= 1, "regime.active_lookback must be >= 1");
        ensure!(
            (1..=r.active_lookback).contains(&r.min_active_windows),
            "regime.min_active_windows ({}) must be in 1..={}",
            r.min_active_windows,
            r.active_lookback
        );
        ensure!(r.min_quiet_windows >= 1, "regime.min_quiet_windows must be >= 1");
        ensure!(
            r.evaluation_interval_ms >= 0,
            "regime.evaluation_interval_ms must be >= 0"
        );
        ensure!(
            (-14 * 60..=14 * 60).contains(&r.schedule.utc_offset_minutes),
            "regime.schedule.utc_offset_minutes out of range: {}",
            r.schedule.utc_offset_minutes
        );

        let m = &r.market;
        for (name, v) in [
            ("min_trades_per_min", m.min_trades_per_min),
            ("min_quotes_per_sec", m.min_quotes_per_sec),
            ("min_volatility_bps", m.min_volatility_bps),
            ("min_volume_quote", m.min_volume_quote),
        ] {
            ensure!(v.is_finite() && v >= 0.0, "regime.market.{name} must be finite and >= 0, got {v}");
        }
        ensure!(
            !m.max_spread_bps.is_nan() && m.max_spread_bps > 0.0,
            "regime.market.max_spread_bps must be > 0"
        );
        Ok(())
    }

    fn validate_gating(&self) -> Result<()> {
        let g = &self.gating;
        for (regime, t) in [(Regime::Active, &g.active), (Regime::Quiet, &g.quiet)] {
            ensure!(
                t.weak_signal_threshold.is_finite() && t.weak_signal_threshold >= 0.0,
                "gating.{regime}.weak_signal_threshold must be finite and >= 0"
            );
            ensure!(
                (0.0..=1.0).contains(&t.consistency_min),
                "gating.{regime}.consistency_min must be in [0, 1], got {}",
                t.consistency_min
            );
        }
        if g.quiet.weak_signal_threshold < g.active.weak_signal_threshold
            || g.quiet.consistency_min < g.active.consistency_min
        {
            warn!(
                active_weak = g.active.weak_signal_threshold,
                quiet_weak = g.quiet.weak_signal_threshold,
                active_consistency = g.active.consistency_min,
                quiet_consistency = g.quiet.consistency_min,
                "quiet regime thresholds are looser than active"
            );
        }

        ensure!(
            g.max_spread_bps.is_finite() && g.max_spread_bps > 0.0,
            "gating.max_spread_bps must be > 0"
        );
        ensure!(
            g.max_lag_sec.is_finite() && g.max_lag_sec >= 0.0,
            "gating.max_lag_sec must be >= 0"
        );
        ensure!(g.dedupe_ms >= 0, "gating.dedupe_ms must be >= 0");
        ensure!(
            (0.0..=MAX_COOLDOWN_SEC).contains(&g.cooldown_after_exit_sec),
            "gating.cooldown_after_exit_sec must be in [0, {MAX_COOLDOWN_SEC}], got {}",
            g.cooldown_after_exit_sec
        );
        ensure!(
            g.flip_rearm_margin.is_finite() && g.flip_rearm_margin >= 0.0,
            "gating.flip_rearm_margin must be >= 0"
        );
        ensure!(g.confirm_ticks >= 1, "gating.confirm_ticks must be >= 1");
        Ok(())
    }
}
