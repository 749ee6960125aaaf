// =============================================================================
// Cooldown Tracker: post-exit quiet period per symbol
// =============================================================================
//
// The execution layer reports every position close through the narrow
// `ExitListener` interface. The tracker keeps one atomic last-exit timestamp
// slot per symbol, so exit notifications arriving from another task never
// tear a read made by the gating pipeline.
//
//   in_cooldown(symbol, now) <=> now - last_exit(symbol) < cooldown_ms
//
// Entries never expire on their own. No entry => never in cooldown.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Sentinel stored in a slot before any exit has been written.
const NO_EXIT: i64 = i64::MIN;

/// Receiver of position-exit notifications from the execution layer.
pub trait ExitListener: Send + Sync {
    fn record_exit(&self, symbol: &str, ts_ms: i64) -> Result<()>;
}

/// Forward an exit to `listener`, logging instead of propagating failures.
/// Returns whether the notification was accepted.
pub fn notify_exit(listener: &dyn ExitListener, symbol: &str, ts_ms: i64) -> bool {
    match listener.record_exit(symbol, ts_ms) {
        Ok(()) => true,
        Err(e) => {
            warn!(symbol, ts_ms, error = %e, "exit notification failed, cooldown not updated");
            false
        }
    }
}

pub struct CooldownTracker {
    cooldown_ms: i64,
    slots: RwLock<HashMap<String, Arc<AtomicI64>>>,
}

impl CooldownTracker {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_ms
    }

    fn slot(&self, symbol: &str) -> Arc<AtomicI64> {
        if let Some(slot) = self.slots.read().get(symbol) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(NO_EXIT)))
            .clone()
    }

    /// Timestamp of the latest recorded exit for `symbol`.
    pub fn last_exit(&self, symbol: &str) -> Option<i64> {
        let ts = self.slots.read().get(symbol)?.load(Ordering::Acquire);
        (ts != NO_EXIT).then_some(ts)
    }

    pub fn in_cooldown(&self, symbol: &str, ts_ms: i64) -> bool {
        self.remaining_ms(symbol, ts_ms).is_some()
    }

    /// Milliseconds of cooldown left at `ts_ms`, `None` if not cooling down.
    pub fn remaining_ms(&self, symbol: &str, ts_ms: i64) -> Option<i64> {
        let last = self.last_exit(symbol)?;
        let elapsed = ts_ms.saturating_sub(last);
        (elapsed < self.cooldown_ms).then(|| self.cooldown_ms.saturating_sub(elapsed))
    }
}

impl ExitListener for CooldownTracker {
    /// Overwrite the last-exit timestamp; the latest call wins.
    fn record_exit(&self, symbol: &str, ts_ms: i64) -> Result<()> {
        ensure!(!symbol.is_empty(), "exit notification without symbol");
        ensure!(ts_ms != NO_EXIT, "exit notification with invalid timestamp");

        let prev = self.slot(symbol).swap(ts_ms, Ordering::AcqRel);
        if prev == ts_ms {
            debug!(symbol, ts_ms, "exit already recorded");
        } else {
            debug!(symbol, ts_ms, cooldown_ms = self.cooldown_ms, "exit recorded, cooldown armed");
        }
        Ok(())
    }
}
