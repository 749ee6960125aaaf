// =============================================================================
// Shared types used across the signal admission engine
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Input
// =============================================================================

/// One tick of per-symbol microstructure features, as produced by the
/// upstream feature pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Event timestamp in epoch milliseconds.
    pub ts_ms: i64,
    pub symbol: String,
    pub price: f64,
    /// Normalized order-flow imbalance z-score.
    pub ofi_z: f64,
    /// Normalized volume-delta z-score.
    pub volume_delta_z: f64,
    /// Bid-ask spread in basis points.
    pub spread_bps: f64,
    /// Seconds elapsed between the source event and this row.
    #[serde(default)]
    pub lag_sec: f64,
    /// Set while upstream indicators are still warming up.
    #[serde(default)]
    pub warmup: bool,
}

// =============================================================================
// Direction / Side
// =============================================================================

/// Directional classification of a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Direction {
    /// Collapse strength grades into a trading side. `None` for neutral.
    pub fn side(self) -> Option<Side> {
        match self {
            Self::StrongBuy | Self::Buy => Some(Side::Buy),
            Self::StrongSell | Self::Sell => Some(Side::Sell),
            Self::Neutral => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "strong_buy"),
            Self::Buy => write!(f, "buy"),
            Self::Neutral => write!(f, "neutral"),
            Self::Sell => write!(f, "sell"),
            Self::StrongSell => write!(f, "strong_sell"),
        }
    }
}

/// Trading side, used wherever strength grades are irrelevant
/// (debounce streaks, flip detection, deduplication).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

// =============================================================================
// Regime
// =============================================================================

/// Coarse market-activity classification selecting gating strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Active,
    Quiet,
}

impl Default for Regime {
    fn default() -> Self {
        Self::Quiet
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

// =============================================================================
// Rejection reasons
// =============================================================================

/// Stable, enumerable reason codes attached to rejected signals.
///
/// The declaration order is the gate precedence order; reasons on a
/// [`Signal`] always appear in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Row arrived with a timestamp older than the last processed row.
    OutOfOrder,
    Warmup,
    /// Non-finite feature values or a non-positive price.
    InvalidInput,
    SpreadTooWide,
    LagTooHigh,
    WeakSignal,
    LowConsistency,
    AwaitingConfirmation,
    FlipMargin,
    Duplicate,
    Cooldown,
}

impl RejectReason {
    pub const ALL: [RejectReason; 11] = [
        Self::OutOfOrder,
        Self::Warmup,
        Self::InvalidInput,
        Self::SpreadTooWide,
        Self::LagTooHigh,
        Self::WeakSignal,
        Self::LowConsistency,
        Self::AwaitingConfirmation,
        Self::FlipMargin,
        Self::Duplicate,
        Self::Cooldown,
    ];

    /// Stable code for downstream analytics.
    pub fn code(self) -> &'static str {
        match self {
            Self::OutOfOrder => "out_of_order",
            Self::Warmup => "warmup",
            Self::InvalidInput => "invalid_input",
            Self::SpreadTooWide => "spread_too_wide",
            Self::LagTooHigh => "lag_too_high",
            Self::WeakSignal => "weak_signal",
            Self::LowConsistency => "low_consistency",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::FlipMargin => "flip_margin",
            Self::Duplicate => "duplicate",
            Self::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Output
// =============================================================================

/// Admission verdict for one feature row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub direction: Direction,
    pub score: f64,
    pub consistency: f64,
    pub regime: Regime,
    /// True iff `reasons` is empty.
    pub confirm: bool,
    /// Every failing gate, in gate order.
    pub reasons: Vec<RejectReason>,
    /// Whether the activity snapshot behind the regime decision was backed
    /// by enough samples.
    pub market_reliable: bool,
}

impl Signal {
    pub fn rejected_by(&self, reason: RejectReason) -> bool {
        self.reasons.contains(&reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_sides() {
        assert_eq!(Direction::StrongBuy.side(), Some(Side::Buy));
        assert_eq!(Direction::Buy.side(), Some(Side::Buy));
        assert_eq!(Direction::Sell.side(), Some(Side::Sell));
        assert_eq!(Direction::StrongSell.side(), Some(Side::Sell));
        assert_eq!(Direction::Neutral.side(), None);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn reason_codes_match_serde() {
        for reason in RejectReason::ALL {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.code()));
        }
    }

    #[test]
    fn reason_order_follows_gate_precedence() {
        let mut sorted = RejectReason::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, RejectReason::ALL.to_vec());
    }

    #[test]
    fn feature_row_defaults_optional_fields() {
        let json = r#"{"ts_ms":1,"symbol":"BTCUSDT","price":100.0,"ofi_z":1.0,"volume_delta_z":0.5,"spread_bps":2.0}"#;
        let row: FeatureRow = serde_json::from_str(json).unwrap();
        assert!(!row.warmup);
        assert_eq!(row.lag_sec, 0.0);
    }
}
