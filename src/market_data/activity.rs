// =============================================================================
// Market Activity Estimator: robust rolling activity snapshot per symbol
// =============================================================================
//
// Raw activity samples (trade/quote counts, spread, mid price, quote volume
// over a sampling interval) are kept in a per-symbol sliding time window.
// Each snapshot statistic is a winsorized median over the window, so a single
// burst of prints cannot flip the market trigger on its own.
//
// When the window holds fewer than `min_samples` samples, or no mid-price move
// can be measured, the snapshot is explicitly flagged:
//   - CarriedForward: the last reliable snapshot, re-stamped
//   - Insufficient:   no reliable snapshot has ever been produced
// A silent zero would read as "dead market" and force the quiet regime.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ActivityConfig;
use crate::market_data::robust::winsorized_median;

// =============================================================================
// Types
// =============================================================================

/// Activity observed over one sampling interval ending at `ts_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySample {
    pub ts_ms: i64,
    /// Length of the sampling interval.
    pub interval_ms: i64,
    pub trade_count: u64,
    pub quote_count: u64,
    pub spread_bps: f64,
    pub mid_price: f64,
    /// Traded notional in quote currency during the interval.
    pub quote_volume: f64,
}

impl ActivitySample {
    fn is_valid(&self) -> bool {
        self.interval_ms > 0
            && self.spread_bps.is_finite()
            && self.spread_bps >= 0.0
            && self.mid_price.is_finite()
            && self.mid_price > 0.0
            && self.quote_volume.is_finite()
            && self.quote_volume >= 0.0
    }

    fn minutes(&self) -> f64 {
        self.interval_ms as f64 / 60_000.0
    }
}

/// How much the snapshot values can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotQuality {
    /// Computed from at least `min_samples` samples.
    Reliable,
    /// Too few samples; values are the last reliable snapshot.
    CarriedForward,
    /// Too few samples and nothing to carry forward; values are zero.
    Insufficient,
}

/// Summary of recent trading activity for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketActivitySnapshot {
    pub ts_ms: i64,
    pub trades_per_min: f64,
    pub quotes_per_sec: f64,
    pub spread_bps: f64,
    /// Typical absolute mid-price move between samples, in bps.
    pub volatility_bps: f64,
    /// Traded notional per minute, in quote currency.
    pub volume_quote: f64,
    /// Samples in the window when the snapshot was taken.
    pub sample_count: usize,
    pub quality: SnapshotQuality,
}

impl MarketActivitySnapshot {
    fn insufficient(ts_ms: i64, sample_count: usize) -> Self {
        Self {
            ts_ms,
            trades_per_min: 0.0,
            quotes_per_sec: 0.0,
            spread_bps: 0.0,
            volatility_bps: 0.0,
            volume_quote: 0.0,
            sample_count,
            quality: SnapshotQuality::Insufficient,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.quality == SnapshotQuality::Reliable
    }

    /// Whether the values may be compared against market thresholds.
    pub fn is_usable(&self) -> bool {
        self.quality != SnapshotQuality::Insufficient
    }
}

// =============================================================================
// Per-symbol window
// =============================================================================

#[derive(Default)]
struct SymbolWindow {
    samples: VecDeque<ActivitySample>,
    last_reliable: Option<MarketActivitySnapshot>,
}

impl SymbolWindow {
    fn evict_before(&mut self, cutoff_ms: i64) {
        while self.samples.front().is_some_and(|s| s.ts_ms < cutoff_ms) {
            self.samples.pop_front();
        }
    }
}

// =============================================================================
// MarketActivityEstimator
// =============================================================================

/// Thread-safe per-symbol activity estimator.
pub struct MarketActivityEstimator {
    cfg: ActivityConfig,
    windows: RwLock<HashMap<String, Arc<Mutex<SymbolWindow>>>>,
}

impl MarketActivityEstimator {
    pub fn new(cfg: ActivityConfig) -> Self {
        Self {
            cfg,
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn window(&self, symbol: &str) -> Arc<Mutex<SymbolWindow>> {
        if let Some(w) = self.windows.read().get(symbol) {
            return w.clone();
        }
        self.windows
            .write()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    /// Record a raw activity sample. Invalid or out-of-order samples are
    /// dropped with a warning.
    pub fn observe(&self, symbol: &str, sample: ActivitySample) {
        if !sample.is_valid() {
            warn!(symbol, ts_ms = sample.ts_ms, "dropping invalid activity sample");
            return;
        }

        let window = self.window(symbol);
        let mut w = window.lock();

        if let Some(last) = w.samples.back() {
            if sample.ts_ms < last.ts_ms {
                warn!(
                    symbol,
                    ts_ms = sample.ts_ms,
                    last_ts_ms = last.ts_ms,
                    "dropping out-of-order activity sample"
                );
                return;
            }
        }

        let cutoff = sample.ts_ms - self.cfg.window_ms;
        w.samples.push_back(sample);
        w.evict_before(cutoff);
        while w.samples.len() > self.cfg.max_samples {
            w.samples.pop_front();
        }
    }

    /// Compute the activity snapshot for `symbol` as of `now_ms`.
    pub fn snapshot(&self, symbol: &str, now_ms: i64) -> MarketActivitySnapshot {
        let window = self.window(symbol);
        let mut w = window.lock();
        w.evict_before(now_ms - self.cfg.window_ms);

        let count = w.samples.len();
        let computed = if count >= self.cfg.min_samples {
            self.compute(&w.samples, now_ms)
        } else {
            None
        };
        if let Some(snap) = computed {
            w.last_reliable = Some(snap.clone());
            return snap;
        }

        match &w.last_reliable {
            Some(prev) => {
                debug!(symbol, count, "activity window thin, carrying last snapshot");
                MarketActivitySnapshot {
                    ts_ms: now_ms,
                    sample_count: count,
                    quality: SnapshotQuality::CarriedForward,
                    ..prev.clone()
                }
            }
            None => MarketActivitySnapshot::insufficient(now_ms, count),
        }
    }

    /// `None` when no mid-price move can be measured in the window.
    fn compute(
        &self,
        samples: &VecDeque<ActivitySample>,
        now_ms: i64,
    ) -> Option<MarketActivitySnapshot> {
        let pct = self.cfg.winsor_pct;

        let trades: Vec<f64> = samples
            .iter()
            .map(|s| s.trade_count as f64 / s.minutes())
            .collect();
        let quotes: Vec<f64> = samples
            .iter()
            .map(|s| s.quote_count as f64 / (s.interval_ms as f64 / 1_000.0))
            .collect();
        let spreads: Vec<f64> = samples.iter().map(|s| s.spread_bps).collect();
        let volumes: Vec<f64> = samples
            .iter()
            .map(|s| s.quote_volume / s.minutes())
            .collect();
        let moves: Vec<f64> = samples
            .iter()
            .zip(samples.iter().skip(1))
            .filter(|(a, b)| a.mid_price > 0.0 && b.mid_price > 0.0)
            .map(|(a, b)| (b.mid_price / a.mid_price).ln().abs() * 10_000.0)
            .collect();

        let volatility_bps = winsorized_median(&moves, pct)?;

        Some(MarketActivitySnapshot {
            ts_ms: now_ms,
            trades_per_min: winsorized_median(&trades, pct).unwrap_or(0.0),
            quotes_per_sec: winsorized_median(&quotes, pct).unwrap_or(0.0),
            spread_bps: winsorized_median(&spreads, pct).unwrap_or(0.0),
            volatility_bps,
            volume_quote: winsorized_median(&volumes, pct).unwrap_or(0.0),
            sample_count: samples.len(),
            quality: SnapshotQuality::Reliable,
        })
    }

    /// Number of samples currently retained for `symbol`.
    pub fn sample_count(&self, symbol: &str) -> usize {
        self.windows
            .read()
            .get(symbol)
            .map(|w| w.lock().samples.len())
            .unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min_samples: usize) -> ActivityConfig {
        ActivityConfig {
            window_ms: 60_000,
            min_samples,
            max_samples: 100,
            winsor_pct: 0.1,
        }
    }

    fn sample(ts_ms: i64, trades: u64, mid: f64) -> ActivitySample {
        ActivitySample {
            ts_ms,
            interval_ms: 1_000,
            trade_count: trades,
            quote_count: 20,
            spread_bps: 2.0,
            mid_price: mid,
            quote_volume: 500.0,
        }
    }

    #[test]
    fn insufficient_when_never_reliable() {
        let est = MarketActivityEstimator::new(cfg(3));
        est.observe("BTC", sample(1_000, 5, 100.0));
        let snap = est.snapshot("BTC", 1_000);
        assert_eq!(snap.quality, SnapshotQuality::Insufficient);
        assert!(!snap.is_usable());
        assert_eq!(snap.sample_count, 1);
    }

    #[test]
    fn reliable_rates_normalized_by_interval() {
        let est = MarketActivityEstimator::new(cfg(3));
        for i in 0..5 {
            est.observe("BTC", sample(1_000 * (i + 1), 2, 100.0));
        }
        let snap = est.snapshot("BTC", 5_000);
        assert!(snap.is_reliable());
        // 2 trades per 1s interval = 120 trades/min.
        assert!((snap.trades_per_min - 120.0).abs() < 1e-9);
        assert!((snap.quotes_per_sec - 20.0).abs() < 1e-9);
        assert!((snap.spread_bps - 2.0).abs() < 1e-9);
        assert!((snap.volume_quote - 30_000.0).abs() < 1e-9);
        assert_eq!(snap.volatility_bps, 0.0);
    }

    #[test]
    fn trade_spike_is_winsorized() {
        let est = MarketActivityEstimator::new(cfg(3));
        for i in 0..9 {
            est.observe("BTC", sample(1_000 * (i + 1), 1, 100.0));
        }
        est.observe("BTC", sample(10_000, 10_000, 100.0));
        let snap = est.snapshot("BTC", 10_000);
        assert!((snap.trades_per_min - 60.0).abs() < 1e-9);
    }

    #[test]
    fn volatility_from_mid_moves() {
        let est = MarketActivityEstimator::new(cfg(2));
        est.observe("ETH", sample(1_000, 1, 100.0));
        est.observe("ETH", sample(2_000, 1, 100.1));
        est.observe("ETH", sample(3_000, 1, 100.0));
        let snap = est.snapshot("ETH", 3_000);
        // ~10 bps per step.
        assert!((snap.volatility_bps - 10.0).abs() < 0.1, "got {}", snap.volatility_bps);
    }

    #[test]
    fn carries_forward_after_window_thins() {
        let est = MarketActivityEstimator::new(cfg(3));
        for i in 0..3 {
            est.observe("BTC", sample(1_000 * (i + 1), 2, 100.0));
        }
        let first = est.snapshot("BTC", 3_000);
        assert!(first.is_reliable());

        // All samples fall out of the 60s window.
        let later = est.snapshot("BTC", 200_000);
        assert_eq!(later.quality, SnapshotQuality::CarriedForward);
        assert!(later.is_usable());
        assert_eq!(later.sample_count, 0);
        assert_eq!(later.ts_ms, 200_000);
        assert!((later.trades_per_min - first.trades_per_min).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_and_invalid_samples_dropped() {
        let est = MarketActivityEstimator::new(cfg(1));
        est.observe("BTC", sample(5_000, 1, 100.0));
        est.observe("BTC", sample(4_000, 1, 100.0));
        let mut bad = sample(6_000, 1, 100.0);
        bad.interval_ms = 0;
        est.observe("BTC", bad);
        assert_eq!(est.sample_count("BTC"), 1);
    }

    #[test]
    fn window_bounded_by_time_and_cap() {
        let mut c = cfg(1);
        c.max_samples = 10;
        let est = MarketActivityEstimator::new(c);
        for i in 0..50 {
            est.observe("BTC", sample(1_000 * i, 1, 100.0));
        }
        assert_eq!(est.sample_count("BTC"), 10);

        est.observe("BTC", sample(1_000_000, 1, 100.0));
        assert_eq!(est.sample_count("BTC"), 1);
    }

    #[test]
    fn symbols_are_independent() {
        let est = MarketActivityEstimator::new(cfg(2));
        est.observe("BTC", sample(1_000, 3, 100.0));
        est.observe("BTC", sample(2_000, 3, 100.0));
        assert_eq!(est.sample_count("ETH"), 0);
        assert!(!est.snapshot("ETH", 1_000).is_usable());
        assert!(est.snapshot("BTC", 2_000).is_reliable());
    }

    #[test]
    fn single_sample_is_never_reliable() {
        // One sample has no mid-price move, so volatility is unknown.
        let est = MarketActivityEstimator::new(cfg(1));
        est.observe("BTC", sample(1_000, 50, 100.0));
        let snap = est.snapshot("BTC", 1_000);
        assert_eq!(snap.quality, SnapshotQuality::Insufficient);
        assert!(!snap.is_usable());

        est.observe("BTC", sample(2_000, 50, 100.5));
        let snap = est.snapshot("BTC", 2_000);
        assert!(snap.is_reliable());
        assert!(snap.volatility_bps > 40.0);

        // Window thins back to one sample: carry forward, not a zero.
        let thin = est.snapshot("BTC", 61_500);
        assert_eq!(thin.quality, SnapshotQuality::CarriedForward);
        assert!((thin.volatility_bps - snap.volatility_bps).abs() < 1e-12);
    }

    #[test]
    fn non_positive_mid_price_dropped() {
        let est = MarketActivityEstimator::new(cfg(2));
        est.observe("BTC", sample(1_000, 1, 100.0));
        est.observe("BTC", sample(2_000, 1, 0.0));
        est.observe("BTC", sample(3_000, 1, -5.0));
        assert_eq!(est.sample_count("BTC"), 1);
        assert!(!est.snapshot("BTC", 3_000).is_usable());
    }
}
