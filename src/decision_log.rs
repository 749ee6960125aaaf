// =============================================================================
// Decision Log: auditable record of every admit/reject verdict
// =============================================================================
//
// Keeps a bounded ring of the most recent signals plus monotonically
// increasing counters per rejection reason, so downstream analytics can read
// gate hit rates without replaying the stream.
// =============================================================================

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{RejectReason, Signal};

/// Aggregate counters, serialisable for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionStats {
    pub confirmed: u64,
    pub rejected: u64,
    /// Hits per rejection reason code. A rejected signal can hit several.
    pub reasons: BTreeMap<&'static str, u64>,
}

pub struct DecisionLog {
    capacity: usize,
    recent: RwLock<VecDeque<Signal>>,
    confirmed: AtomicU64,
    rejected: AtomicU64,
    reason_hits: [AtomicU64; RejectReason::ALL.len()],
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
            confirmed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            reason_hits: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record a signal. The ring is capped at `capacity`; oldest entries are
    /// evicted first.
    pub fn record(&self, signal: &Signal) {
        if signal.confirm {
            self.confirmed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        for reason in &signal.reasons {
            self.reason_hits[*reason as usize].fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self.recent.write();
        recent.push_back(signal.clone());
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    /// Up to `n` most recent signals, newest last.
    pub fn recent(&self, n: usize) -> Vec<Signal> {
        let recent = self.recent.read();
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Most recent signal for `symbol`, if still in the ring.
    pub fn last_for(&self, symbol: &str) -> Option<Signal> {
        self.recent
            .read()
            .iter()
            .rev()
            .find(|s| s.symbol == symbol)
            .cloned()
    }

    pub fn hits(&self, reason: RejectReason) -> u64 {
        self.reason_hits[reason as usize].load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DecisionStats {
        DecisionStats {
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            reasons: RejectReason::ALL
                .iter()
                .map(|r| (r.code(), self.hits(*r)))
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Regime};

    fn signal(symbol: &str, ts_ms: i64, reasons: Vec<RejectReason>) -> Signal {
        Signal {
            id: format!("{symbol}-{ts_ms}"),
            ts_ms,
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            score: 1.5,
            consistency: 0.5,
            regime: Regime::Active,
            confirm: reasons.is_empty(),
            reasons,
            market_reliable: true,
        }
    }

    #[test]
    fn ring_is_bounded() {
        let log = DecisionLog::new(3);
        for ts in 0..10 {
            log.record(&signal("BTC", ts, vec![]));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].ts_ms, 7);
        assert_eq!(recent[2].ts_ms, 9);
        assert_eq!(log.recent(1)[0].ts_ms, 9);
    }

    #[test]
    fn counts_reasons_and_totals() {
        let log = DecisionLog::new(10);
        log.record(&signal("BTC", 1, vec![]));
        log.record(&signal("BTC", 2, vec![RejectReason::Warmup, RejectReason::WeakSignal]));
        log.record(&signal("ETH", 3, vec![RejectReason::WeakSignal]));

        let stats = log.stats();
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.reasons.get("weak_signal"), Some(&2));
        assert_eq!(stats.reasons.get("warmup"), Some(&1));
        assert!(!stats.reasons.contains_key("cooldown"));
    }

    #[test]
    fn last_for_symbol() {
        let log = DecisionLog::new(10);
        log.record(&signal("BTC", 1, vec![]));
        log.record(&signal("ETH", 2, vec![]));
        log.record(&signal("BTC", 3, vec![RejectReason::Cooldown]));
        assert_eq!(log.last_for("BTC").unwrap().ts_ms, 3);
        assert_eq!(log.last_for("ETH").unwrap().ts_ms, 2);
        assert!(log.last_for("SOL").is_none());
    }
}
