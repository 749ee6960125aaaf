// =============================================================================
// Regime Manager: active/quiet hysteresis state machine
// =============================================================================
//
// Each evaluation produces a raw trigger:
//
//   schedule_trigger = inside an active time window on an enabled weekday
//   market_trigger   = every market-activity threshold satisfied
//   raw_trigger      = schedule_trigger (AND | OR) market_trigger
//
// When the activity snapshot is `Insufficient` the market trigger abstains and
// the raw trigger is the schedule trigger alone.
//
// Hysteresis over the bounded per-symbol trigger history:
//
//   QUIET  -> ACTIVE  once the last `active_lookback` evaluations hold at
//                     least `min_active_windows` trues
//   ACTIVE -> QUIET   once the last `min_quiet_windows` evaluations are all
//                     false
//
// Otherwise the mode holds. Initial mode is QUIET with an empty history.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{MarketThresholds, RegimeConfig, TriggerCombine};
use crate::market_data::MarketActivitySnapshot;
use crate::regime::schedule::Schedule;
use crate::types::Regime;

// =============================================================================
// Types
// =============================================================================

/// Per-symbol regime state. Only [`RegimeManager`] mutates it.
#[derive(Debug, Clone, Default)]
pub struct RegimeState {
    mode: Regime,
    history: VecDeque<bool>,
    last_eval_ms: Option<i64>,
    last_transition_ms: Option<i64>,
}

impl RegimeState {
    pub fn mode(&self) -> Regime {
        self.mode
    }

    /// Raw trigger history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = bool> + '_ {
        self.history.iter().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_transition_ms(&self) -> Option<i64> {
        self.last_transition_ms
    }
}

/// A regime change for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: Regime,
    pub to: Regime,
    pub ts_ms: i64,
}

/// Outcome of one call to [`RegimeManager::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegimeEvaluation {
    /// Mode after this evaluation.
    pub regime: Regime,
    /// False when the call fell inside the evaluation interval and the mode
    /// was returned unchanged.
    pub evaluated: bool,
    pub schedule_trigger: bool,
    /// `None` when the activity snapshot was insufficient.
    pub market_trigger: Option<bool>,
    pub raw_trigger: bool,
    pub transition: Option<RegimeTransition>,
}

// =============================================================================
// RegimeManager
// =============================================================================

pub struct RegimeManager {
    combine: TriggerCombine,
    active_lookback: usize,
    min_active_windows: usize,
    min_quiet_windows: usize,
    history_capacity: usize,
    evaluation_interval_ms: i64,
    market: MarketThresholds,
    schedule: Schedule,
}

impl RegimeManager {
    pub fn new(cfg: &RegimeConfig, schedule: Schedule) -> Self {
        Self {
            combine: cfg.combine,
            active_lookback: cfg.active_lookback,
            min_active_windows: cfg.min_active_windows,
            min_quiet_windows: cfg.min_quiet_windows,
            history_capacity: cfg.history_capacity(),
            evaluation_interval_ms: cfg.evaluation_interval_ms,
            market: cfg.market.clone(),
            schedule,
        }
    }

    pub fn schedule_trigger(&self, ts_ms: i64) -> bool {
        self.schedule.is_active(ts_ms)
    }

    /// Conjunction of every market threshold, or `None` if the snapshot
    /// cannot be trusted at all.
    pub fn market_trigger(&self, snap: &MarketActivitySnapshot) -> Option<bool> {
        if !snap.is_usable() {
            return None;
        }
        let m = &self.market;
        Some(
            snap.trades_per_min >= m.min_trades_per_min
                && snap.quotes_per_sec >= m.min_quotes_per_sec
                && snap.spread_bps <= m.max_spread_bps
                && snap.volatility_bps >= m.min_volatility_bps
                && snap.volume_quote >= m.min_volume_quote,
        )
    }

    pub fn raw_trigger(&self, schedule: bool, market: Option<bool>) -> bool {
        match market {
            Some(market) => self.combine.combine(schedule, market),
            None => schedule,
        }
    }

    /// Append one raw trigger and apply hysteresis. Returns the new mode if
    /// the state switched.
    pub fn update(&self, state: &mut RegimeState, raw_trigger: bool) -> Option<Regime> {
        state.history.push_back(raw_trigger);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }

        let next = match state.mode {
            Regime::Quiet => {
                let trues = state
                    .history
                    .iter()
                    .rev()
                    .take(self.active_lookback)
                    .filter(|t| **t)
                    .count();
                (trues >= self.min_active_windows).then_some(Regime::Active)
            }
            Regime::Active => {
                let falses = state.history.iter().rev().take_while(|t| !**t).count();
                (falses >= self.min_quiet_windows).then_some(Regime::Quiet)
            }
        };

        if let Some(mode) = next {
            state.mode = mode;
        }
        next
    }

    /// Evaluate triggers for `symbol` at `ts_ms` and step the state machine,
    /// at most once per evaluation interval.
    pub fn evaluate(
        &self,
        symbol: &str,
        state: &mut RegimeState,
        ts_ms: i64,
        snapshot: &MarketActivitySnapshot,
    ) -> RegimeEvaluation {
        let schedule_trigger = self.schedule_trigger(ts_ms);
        let market_trigger = self.market_trigger(snapshot);
        let raw_trigger = self.raw_trigger(schedule_trigger, market_trigger);

        let due = match state.last_eval_ms {
            Some(last) => ts_ms - last >= self.evaluation_interval_ms,
            None => true,
        };
        if !due {
            return RegimeEvaluation {
                regime: state.mode,
                evaluated: false,
                schedule_trigger,
                market_trigger,
                raw_trigger,
                transition: None,
            };
        }

        state.last_eval_ms = Some(ts_ms);
        let from = state.mode;
        let transition = self.update(state, raw_trigger).map(|to| {
            state.last_transition_ms = Some(ts_ms);
            RegimeTransition { from, to, ts_ms }
        });

        if let Some(t) = transition {
            info!(
                symbol,
                from = %t.from,
                to = %t.to,
                ts_ms,
                schedule_trigger,
                market_trigger = ?market_trigger,
                "regime transition"
            );
        } else {
            debug!(
                symbol,
                regime = %state.mode,
                raw_trigger,
                schedule_trigger,
                market_trigger = ?market_trigger,
                "regime evaluated"
            );
        }

        RegimeEvaluation {
            regime: state.mode,
            evaluated: true,
            schedule_trigger,
            market_trigger,
            raw_trigger,
            transition,
        }
    }
}
