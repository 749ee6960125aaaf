// =============================================================================
// Gating Pipeline: per-tick admit / reject decision
// =============================================================================
//
// Pipeline for one feature row:
//   1. Reject out-of-order rows (no state touched)
//   2. Fuse order-flow and volume-delta into score + consistency
//   3. Snapshot market activity, step the regime state machine
//   4. Evaluate every gate and collect all failing reasons:
//        warmup -> data quality -> weak signal -> consistency
//        -> confirmation -> flip margin -> dedup -> cooldown
//   5. Confirm iff no gate failed, record in the decision log
//
// Gates are not short-circuited: every failing gate is reported, so a
// rejected signal can be audited in full. Regime-dependent thresholds come
// from the per-regime tables in the configuration.
//
// Per-symbol state (regime, debounce, dedup, ordering) lives in one store
// keyed by symbol; each symbol has its own lock, so symbol streams can be
// evaluated on independent threads.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::{CompiledConfig, EngineConfig};
use crate::decision_log::DecisionLog;
use crate::guards::{CooldownTracker, DebounceGuard, DebounceState, DebounceVerdict, ExitListener};
use crate::market_data::{ActivitySample, MarketActivityEstimator};
use crate::regime::{RegimeManager, RegimeState};
use crate::signals::{FusionResult, FusionScorer};
use crate::types::{FeatureRow, Regime, RejectReason, Side, Signal};

// =============================================================================
// Per-symbol state
// =============================================================================

#[derive(Debug, Default)]
struct SymbolState {
    last_ts_ms: Option<i64>,
    regime: RegimeState,
    debounce: DebounceState,
    /// Side and timestamp of the last confirmed signal.
    last_admitted: Option<(Side, i64)>,
}

// =============================================================================
// GatingPipeline
// =============================================================================

pub struct GatingPipeline {
    config: Arc<CompiledConfig>,
    scorer: FusionScorer,
    activity: MarketActivityEstimator,
    regime: RegimeManager,
    debounce: DebounceGuard,
    cooldown: Arc<CooldownTracker>,
    symbols: RwLock<HashMap<String, Arc<Mutex<SymbolState>>>>,
    decisions: DecisionLog,
}

impl GatingPipeline {
    /// Validate `config` and build the engine. Configuration errors are fatal.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self::from_compiled(Arc::new(config.compile()?)))
    }

    pub fn from_compiled(config: Arc<CompiledConfig>) -> Self {
        let cfg = &config.engine;
        Self {
            scorer: FusionScorer::new(&cfg.fusion),
            activity: MarketActivityEstimator::new(cfg.activity.clone()),
            regime: RegimeManager::new(&cfg.regime, config.schedule.clone()),
            debounce: DebounceGuard::new(cfg.gating.confirm_ticks, cfg.gating.flip_rearm_margin),
            cooldown: Arc::new(CooldownTracker::new(cfg.gating.cooldown_ms())),
            symbols: RwLock::new(HashMap::new()),
            decisions: DecisionLog::new(cfg.decision_log_capacity),
            config,
        }
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    /// Exit-notification handle for the execution layer.
    pub fn exit_listener(&self) -> Arc<dyn ExitListener> {
        self.cooldown.clone()
    }

    pub fn record_exit(&self, symbol: &str, ts_ms: i64) -> Result<()> {
        self.cooldown.record_exit(symbol, ts_ms)
    }

    /// Feed a raw market-activity sample for `symbol`.
    pub fn observe_activity(&self, symbol: &str, sample: ActivitySample) {
        self.activity.observe(symbol, sample);
    }

    /// Current regime of `symbol` without evaluating anything.
    pub fn regime(&self, symbol: &str) -> Regime {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.lock().regime.mode())
            .unwrap_or_default()
    }

    fn symbol_state(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        if let Some(s) = self.symbols.read().get(symbol) {
            return s.clone();
        }
        self.symbols
            .write()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    /// Decide whether the signal carried by `row` is admitted.
    pub fn evaluate(&self, row: &FeatureRow) -> Signal {
        let fusion = self.scorer.score(row);
        let state = self.symbol_state(&row.symbol);
        let mut st = state.lock();

        if let Some(last_ts) = st.last_ts_ms {
            if row.ts_ms < last_ts {
                warn!(
                    symbol = %row.symbol,
                    ts_ms = row.ts_ms,
                    last_ts_ms = last_ts,
                    "out-of-order feature row rejected"
                );
                let signal = self.build_signal(
                    row,
                    &fusion,
                    st.regime.mode(),
                    vec![RejectReason::OutOfOrder],
                    false,
                );
                drop(st);
                self.decisions.record(&signal);
                return signal;
            }
        }
        st.last_ts_ms = Some(row.ts_ms);

        let gating = &self.config.engine.gating;

        // ── Regime ───────────────────────────────────────────────────────
        let snapshot = self.activity.snapshot(&row.symbol, row.ts_ms);
        let regime = self
            .regime
            .evaluate(&row.symbol, &mut st.regime, row.ts_ms, &snapshot)
            .regime;
        let thresholds = gating.thresholds(regime);

        let mut reasons = Vec::new();

        // ── 1. Warmup ────────────────────────────────────────────────────
        if row.warmup {
            reasons.push(RejectReason::Warmup);
        }

        // ── 2. Data quality ──────────────────────────────────────────────
        let inputs_valid = row.ofi_z.is_finite()
            && row.volume_delta_z.is_finite()
            && row.price.is_finite()
            && row.price > 0.0
            && row.spread_bps.is_finite()
            && row.lag_sec.is_finite();
        if !inputs_valid {
            reasons.push(RejectReason::InvalidInput);
        }
        if row.spread_bps > gating.max_spread_bps {
            reasons.push(RejectReason::SpreadTooWide);
        }
        if row.lag_sec > gating.max_lag_sec {
            reasons.push(RejectReason::LagTooHigh);
        }

        // ── 3. Weak signal ───────────────────────────────────────────────
        let magnitude = fusion.score.abs();
        if magnitude < thresholds.weak_signal_threshold {
            reasons.push(RejectReason::WeakSignal);
        }

        // ── 4. Consistency ───────────────────────────────────────────────
        if fusion.consistency < thresholds.consistency_min {
            reasons.push(RejectReason::LowConsistency);
        }

        // ── 5 + 6. Confirmation and flip margin ──────────────────────────
        let verdict = self
            .debounce
            .observe(&mut st.debounce, fusion.direction, magnitude);
        match verdict {
            DebounceVerdict::Idle | DebounceVerdict::Pending { .. } => {
                reasons.push(RejectReason::AwaitingConfirmation)
            }
            DebounceVerdict::FlipRejected { .. } => reasons.push(RejectReason::FlipMargin),
            DebounceVerdict::Confirmed { .. } => {}
        }

        // ── 7. Deduplication ─────────────────────────────────────────────
        let side = fusion.direction.side();
        if let (Some(side), Some((last_side, last_ts))) = (side, st.last_admitted) {
            if side == last_side && row.ts_ms - last_ts < gating.dedupe_ms {
                reasons.push(RejectReason::Duplicate);
            }
        }

        // ── 8. Cooldown after exit ───────────────────────────────────────
        if self.cooldown.in_cooldown(&row.symbol, row.ts_ms) {
            reasons.push(RejectReason::Cooldown);
        }

        // Only an admitted signal becomes the dedup and flip reference.
        if reasons.is_empty() {
            if let Some(side) = side {
                st.last_admitted = Some((side, row.ts_ms));
                self.debounce.commit(&mut st.debounce, side, magnitude);
            }
        }
        drop(st);

        let signal = self.build_signal(row, &fusion, regime, reasons, snapshot.is_reliable());

        debug!(
            symbol = %signal.symbol,
            ts_ms = signal.ts_ms,
            direction = %signal.direction,
            score = format!("{:.3}", signal.score),
            consistency = format!("{:.3}", signal.consistency),
            regime = %signal.regime,
            verdict = ?verdict,
            confirm = signal.confirm,
            reasons = ?signal.reasons,
            "signal evaluated"
        );

        self.decisions.record(&signal);
        signal
    }

    fn build_signal(
        &self,
        row: &FeatureRow,
        fusion: &FusionResult,
        regime: Regime,
        reasons: Vec<RejectReason>,
        market_reliable: bool,
    ) -> Signal {
        Signal {
            id: uuid::Uuid::new_v4().to_string(),
            ts_ms: row.ts_ms,
            symbol: row.symbol.clone(),
            direction: fusion.direction,
            score: fusion.score,
            consistency: fusion.consistency,
            regime,
            confirm: reasons.is_empty(),
            reasons,
            market_reliable,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::guards::notify_exit;
    use crate::types::Direction;
    use tracing_subscriber::EnvFilter;

    const T0: i64 = 1_700_000_000_000;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Regime goes active on the first evaluation (empty schedule, no
    /// activity data), every direction confirms on its first tick.
    fn base_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.fusion.ofi_weight = 0.5;
        cfg.fusion.volume_delta_weight = 0.5;
        cfg.fusion.consistency_scale = 1.0 / 0.5_f64.atanh();
        cfg.regime.active_lookback = 1;
        cfg.regime.min_active_windows = 1;
        cfg.regime.min_quiet_windows = 1;
        cfg.regime.evaluation_interval_ms = 0;
        cfg.gating.active.weak_signal_threshold = 1.2;
        cfg.gating.active.consistency_min = 0.4;
        cfg.gating.quiet.weak_signal_threshold = 1.8;
        cfg.gating.quiet.consistency_min = 0.4;
        cfg.gating.confirm_ticks = 1;
        cfg.gating.dedupe_ms = 0;
        cfg.gating.cooldown_after_exit_sec = 120.0;
        cfg
    }

    fn pipeline(cfg: EngineConfig) -> GatingPipeline {
        init_tracing();
        GatingPipeline::new(cfg).unwrap()
    }

    /// ofi 2.0 / vd 1.0 => score 1.5, consistency 0.5 under `base_config`.
    fn row(symbol: &str, ts_ms: i64) -> FeatureRow {
        FeatureRow {
            ts_ms,
            symbol: symbol.to_string(),
            price: 100.0,
            ofi_z: 2.0,
            volume_delta_z: 1.0,
            spread_bps: 2.0,
            lag_sec: 0.1,
            warmup: false,
        }
    }

    fn sell_row(symbol: &str, ts_ms: i64, ofi: f64, vd: f64) -> FeatureRow {
        FeatureRow {
            ofi_z: -ofi,
            volume_delta_z: -vd,
            ..row(symbol, ts_ms)
        }
    }

    #[test]
    fn confirms_in_active_regime() {
        let p = pipeline(base_config());
        let s = p.evaluate(&row("X", T0));
        assert!((s.score - 1.5).abs() < 1e-12);
        assert!((s.consistency - 0.5).abs() < 1e-9);
        assert_eq!(s.regime, Regime::Active);
        assert_eq!(s.direction, Direction::Buy);
        assert!(s.confirm, "unexpected reasons {:?}", s.reasons);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn quiet_regime_rejects_as_weak() {
        let mut cfg = base_config();
        // Active only 09:00-10:00 UTC; T0 is 22:13 UTC.
        cfg.regime.schedule.windows = vec![WindowConfig {
            start: "09:00".into(),
            end: "10:00".into(),
        }];
        let p = pipeline(cfg);
        let s = p.evaluate(&row("X", T0));
        assert_eq!(s.regime, Regime::Quiet);
        assert!(!s.confirm);
        assert!(s.rejected_by(RejectReason::WeakSignal));
        assert_eq!(s.direction, Direction::Buy);
    }

    #[test]
    fn collects_every_failing_gate_in_order() {
        let p = pipeline(base_config());
        let r = FeatureRow {
            warmup: true,
            spread_bps: 50.0,
            lag_sec: 10.0,
            ofi_z: 0.5,
            volume_delta_z: -0.2,
            ..row("X", T0)
        };
        let s = p.evaluate(&r);
        assert_eq!(
            s.reasons,
            vec![
                RejectReason::Warmup,
                RejectReason::SpreadTooWide,
                RejectReason::LagTooHigh,
                RejectReason::WeakSignal,
                RejectReason::LowConsistency,
                RejectReason::AwaitingConfirmation,
            ]
        );
        // Fusion and regime are still reported for audit.
        assert!((s.score - 0.15).abs() < 1e-12);
        assert_eq!(s.direction, Direction::Neutral);
        assert_eq!(s.regime, Regime::Active);
    }

    #[test]
    fn non_finite_features_are_rejected_not_fatal() {
        let p = pipeline(base_config());
        let s = p.evaluate(&FeatureRow {
            ofi_z: f64::NAN,
            ..row("X", T0)
        });
        assert!(s.rejected_by(RejectReason::InvalidInput));
        assert!(p.evaluate(&row("X", T0 + 1)).confirm);
    }

    #[test]
    fn cooldown_after_exit() {
        let mut cfg = base_config();
        cfg.gating.dedupe_ms = 0;
        let p = pipeline(cfg);
        p.record_exit("S", T0).unwrap();

        let during = p.evaluate(&row("S", T0 + 60_000));
        assert!(during.rejected_by(RejectReason::Cooldown));
        assert!(!during.confirm);

        let after = p.evaluate(&row("S", T0 + 121_000));
        assert!(!after.rejected_by(RejectReason::Cooldown));
        assert!(after.confirm);

        // Other symbols are unaffected.
        assert!(p.evaluate(&row("T", T0 + 60_000)).confirm);
    }

    #[test]
    fn exit_listener_handle_feeds_cooldown() {
        let p = pipeline(base_config());
        let listener = p.exit_listener();
        assert!(notify_exit(listener.as_ref(), "S", T0));
        assert!(p.evaluate(&row("S", T0 + 1_000)).rejected_by(RejectReason::Cooldown));
        assert!(!notify_exit(listener.as_ref(), "", T0));
    }

    #[test]
    fn dedup_window() {
        let mut cfg = base_config();
        cfg.gating.dedupe_ms = 10_000;
        let p = pipeline(cfg);

        assert!(p.evaluate(&row("X", T0)).confirm);
        let dup = p.evaluate(&row("X", T0 + 5_000));
        assert_eq!(dup.reasons, vec![RejectReason::Duplicate]);
        // Window measured from the last admitted signal.
        assert!(p.evaluate(&row("X", T0 + 10_000)).confirm);
        assert!(p.evaluate(&row("X", T0 + 20_001)).confirm);
    }

    #[test]
    fn dedup_ignores_opposite_side() {
        let mut cfg = base_config();
        cfg.gating.dedupe_ms = 10_000;
        cfg.gating.flip_rearm_margin = 0.0;
        let p = pipeline(cfg);
        assert!(p.evaluate(&row("X", T0)).confirm);
        let sell = p.evaluate(&sell_row("X", T0 + 1_000, 2.0, 1.0));
        assert!(sell.confirm, "unexpected reasons {:?}", sell.reasons);
    }

    #[test]
    fn consecutive_confirmation_through_pipeline() {
        let mut cfg = base_config();
        cfg.gating.confirm_ticks = 3;
        let p = pipeline(cfg);

        let a = p.evaluate(&row("X", T0));
        let b = p.evaluate(&row("X", T0 + 1));
        assert_eq!(a.reasons, vec![RejectReason::AwaitingConfirmation]);
        assert_eq!(b.reasons, vec![RejectReason::AwaitingConfirmation]);

        // Opposite tick resets the streak.
        let flip = p.evaluate(&sell_row("X", T0 + 2, 2.0, 1.0));
        assert!(flip.rejected_by(RejectReason::AwaitingConfirmation));

        assert!(!p.evaluate(&row("X", T0 + 3)).confirm);
        assert!(!p.evaluate(&row("X", T0 + 4)).confirm);
        assert!(p.evaluate(&row("X", T0 + 5)).confirm);
    }

    #[test]
    fn flip_margin_through_pipeline() {
        let mut cfg = base_config();
        cfg.gating.flip_rearm_margin = 0.5;
        let p = pipeline(cfg);

        assert!(p.evaluate(&row("X", T0)).confirm); // buy, |score| 1.5

        // Needs |score| >= 2.25. 2.0/2.0 => 2.0.
        let weak = p.evaluate(&sell_row("X", T0 + 1, 2.0, 2.0));
        assert_eq!(weak.reasons, vec![RejectReason::FlipMargin]);

        // 2.5/2.0 => 2.25.
        let strong = p.evaluate(&sell_row("X", T0 + 2, 2.5, 2.0));
        assert!(strong.confirm, "unexpected reasons {:?}", strong.reasons);
        assert_eq!(strong.direction, Direction::Sell);
    }

    #[test]
    fn rejected_tick_does_not_rearm_flip() {
        let mut cfg = base_config();
        cfg.gating.flip_rearm_margin = 0.5;
        cfg.fusion.consistency_scale = 1.0;
        let p = pipeline(cfg);

        // Buy 3.0 admitted.
        let strong = FeatureRow {
            ofi_z: 3.0,
            volume_delta_z: 3.0,
            ..row("X", T0)
        };
        assert!(p.evaluate(&strong).confirm);

        // Buy 0.3 rejected as weak; the flip reference stays at 3.0.
        let weak = FeatureRow {
            ofi_z: 0.3,
            volume_delta_z: 0.3,
            ..row("X", T0 + 1)
        };
        let w = p.evaluate(&weak);
        assert!(w.rejected_by(RejectReason::WeakSignal));

        // Sell 1.5 needs 4.5.
        let flip = p.evaluate(&sell_row("X", T0 + 2, 1.5, 1.5));
        assert_eq!(flip.reasons, vec![RejectReason::FlipMargin]);

        let big = p.evaluate(&sell_row("X", T0 + 3, 4.5, 4.5));
        assert!(big.confirm, "unexpected reasons {:?}", big.reasons);
        assert_eq!(big.direction, Direction::StrongSell);
    }

    #[test]
    fn out_of_order_row_rejected_without_state_change() {
        let mut cfg = base_config();
        cfg.gating.confirm_ticks = 2;
        let p = pipeline(cfg);

        assert!(!p.evaluate(&row("X", T0 + 1_000)).confirm);
        let late = p.evaluate(&sell_row("X", T0, 2.0, 1.0));
        assert_eq!(late.reasons, vec![RejectReason::OutOfOrder]);

        // Buy streak unbroken by the late sell row.
        assert!(p.evaluate(&row("X", T0 + 2_000)).confirm);
        // Equal timestamps are in order.
        assert!(!p.evaluate(&row("X", T0 + 2_000)).rejected_by(RejectReason::OutOfOrder));
    }

    #[test]
    fn regime_hysteresis_through_activity() {
        let mut cfg = base_config();
        cfg.regime.combine = crate::config::TriggerCombine::And;
        cfg.regime.market.min_trades_per_min = 400.0;
        cfg.regime.active_lookback = 2;
        cfg.regime.min_active_windows = 2;
        cfg.regime.min_quiet_windows = 2;
        cfg.activity.min_samples = 2;
        cfg.activity.window_ms = 1_500;
        let p = pipeline(cfg);

        // 10 trades per second = 600 per minute.
        let busy = |ts_ms: i64| ActivitySample {
            ts_ms,
            interval_ms: 1_000,
            trade_count: 10,
            quote_count: 10,
            spread_bps: 1.0,
            mid_price: 100.0,
            quote_volume: 1_000.0,
        };
        let calm = |ts_ms: i64| ActivitySample {
            trade_count: 0,
            ..busy(ts_ms)
        };

        p.observe_activity("X", busy(T0 - 1_000));
        p.observe_activity("X", busy(T0));
        assert_eq!(p.evaluate(&row("X", T0)).regime, Regime::Quiet);
        p.observe_activity("X", busy(T0 + 1_000));
        assert_eq!(p.evaluate(&row("X", T0 + 1_000)).regime, Regime::Active);
        // Window holds one busy and one calm sample: median below threshold.
        p.observe_activity("X", calm(T0 + 2_000));
        assert_eq!(p.evaluate(&row("X", T0 + 2_000)).regime, Regime::Active);
        p.observe_activity("X", calm(T0 + 3_000));
        let s = p.evaluate(&row("X", T0 + 3_000));
        assert_eq!(s.regime, Regime::Quiet);
        assert!(s.market_reliable);
        assert_eq!(p.regime("X"), Regime::Quiet);
        assert_eq!(p.regime("unknown"), Regime::Quiet);
    }

    #[test]
    fn single_activity_sample_does_not_force_quiet() {
        let mut cfg = base_config();
        cfg.regime.combine = crate::config::TriggerCombine::And;
        cfg.regime.market.min_volatility_bps = 1.0;
        cfg.activity.min_samples = 2;
        let p = pipeline(cfg);

        p.observe_activity(
            "X",
            ActivitySample {
                ts_ms: T0,
                interval_ms: 1_000,
                trade_count: 50,
                quote_count: 50,
                spread_bps: 1.0,
                mid_price: 100.0,
                quote_volume: 10_000.0,
            },
        );
        // No measurable volatility yet: the market trigger abstains and the
        // schedule alone decides.
        let s = p.evaluate(&row("X", T0));
        assert!(!s.market_reliable);
        assert_eq!(s.regime, Regime::Active);
        assert!(s.confirm);
    }

    #[test]
    fn decision_log_tracks_verdicts() {
        let p = pipeline(base_config());
        p.evaluate(&row("X", T0));
        p.evaluate(&FeatureRow {
            warmup: true,
            ..row("X", T0 + 1)
        });
        let stats = p.decisions().stats();
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(p.decisions().hits(RejectReason::Warmup), 1);
        assert_eq!(p.decisions().last_for("X").unwrap().ts_ms, T0 + 1);
    }

    #[test]
    fn invalid_config_is_fatal() {
        let mut cfg = base_config();
        cfg.fusion.volume_delta_weight = 0.6;
        assert!(GatingPipeline::new(cfg).is_err());
    }

    #[test]
    fn symbols_processed_on_independent_threads() {
        let p = Arc::new(pipeline(base_config()));
        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|sym| {
                let p = p.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .filter(|&i: &i64| p.evaluate(&row(sym, T0 + i * 1_000)).confirm)
                        .count()
                })
            })
            .collect();
        let exits = {
            let p = p.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let _ = p.record_exit("Z", T0 + i);
                }
            })
        };
        for h in handles {
            assert_eq!(h.join().unwrap(), 200);
        }
        exits.join().unwrap();
        assert_eq!(p.decisions().stats().confirmed, 800);
    }
}
