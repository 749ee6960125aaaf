// =============================================================================
// Fusion Scorer: order-flow + volume-delta signal aggregation
// =============================================================================
//
//   score       = w_ofi * ofi_z + w_vd * volume_delta_z
//   consistency = 0                                  if the inputs disagree
//               = tanh(min(|ofi_z|, |vd_z|) / scale)  otherwise
//
// Consistency only grows as the two inputs agree more strongly: raising the
// weaker input's magnitude raises it, a sign disagreement or a near-zero
// input drives it to zero.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::types::{Direction, FeatureRow};

/// Output of the fusion scorer for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub score: f64,
    /// Agreement of the two inputs, in `[0, 1]`.
    pub consistency: f64,
    pub direction: Direction,
}

/// Stateless scorer. Weights are validated when the configuration compiles.
#[derive(Debug, Clone)]
pub struct FusionScorer {
    ofi_weight: f64,
    volume_delta_weight: f64,
    neutral_band: f64,
    strong_score: f64,
    consistency_scale: f64,
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl FusionScorer {
    pub fn new(cfg: &FusionConfig) -> Self {
        Self {
            ofi_weight: cfg.ofi_weight,
            volume_delta_weight: cfg.volume_delta_weight,
            neutral_band: cfg.neutral_band,
            strong_score: cfg.strong_score,
            consistency_scale: cfg.consistency_scale,
        }
    }

    pub fn score(&self, row: &FeatureRow) -> FusionResult {
        self.fuse(row.ofi_z, row.volume_delta_z)
    }

    /// Fuse two normalized inputs. Non-finite inputs count as zero.
    pub fn fuse(&self, ofi_z: f64, volume_delta_z: f64) -> FusionResult {
        let a = finite_or_zero(ofi_z);
        let b = finite_or_zero(volume_delta_z);

        let score = self.ofi_weight * a + self.volume_delta_weight * b;
        let consistency = self.consistency(a, b);

        FusionResult {
            score,
            consistency,
            direction: self.classify(score),
        }
    }

    fn consistency(&self, a: f64, b: f64) -> f64 {
        if a * b <= 0.0 {
            return 0.0;
        }
        (a.abs().min(b.abs()) / self.consistency_scale).tanh()
    }

    fn classify(&self, score: f64) -> Direction {
        if score.abs() < self.neutral_band {
            Direction::Neutral
        } else if score >= self.strong_score {
            Direction::StrongBuy
        } else if score <= -self.strong_score {
            Direction::StrongSell
        } else if score > 0.0 {
            Direction::Buy
        } else {
            Direction::Sell
        }
    }
}
