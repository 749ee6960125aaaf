// =============================================================================
// Debounce Guard: consecutive-direction confirmation + flip re-arm margin
// =============================================================================
//
// A side (buy / sell) is confirmed once `confirm_ticks` consecutive ticks
// report it. Strength grades do not matter: buy and strong_buy extend the same
// streak. A neutral tick breaks the streak entirely.
//
// A confirmation on the side opposite to the last admitted side is a flip. It
// is accepted only if its magnitude reaches the last admitted magnitude times
// (1 + margin); otherwise the previous admission stands.
//
// `observe` runs on every tick and only moves the streak. The flip reference
// changes through `commit`, once the caller has admitted the signal, so a
// tick rejected by some other gate never re-arms a flip.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Direction, Side};

/// Per-symbol debounce state. The streak moves on every processed tick.
#[derive(Debug, Clone, Default)]
pub struct DebounceState {
    streak_side: Option<Side>,
    streak: u32,
    /// Side and magnitude of the last admitted signal.
    last_confirmed: Option<(Side, f64)>,
}

impl DebounceState {
    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn streak_side(&self) -> Option<Side> {
        self.streak_side
    }

    pub fn last_confirmed_side(&self) -> Option<Side> {
        self.last_confirmed.map(|(side, _)| side)
    }

    pub fn last_confirmed_magnitude(&self) -> Option<f64> {
        self.last_confirmed.map(|(_, mag)| mag)
    }
}

/// Result of feeding one tick to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DebounceVerdict {
    /// Neutral tick; nothing to confirm.
    Idle,
    /// Streak has not reached the required length yet.
    Pending { streak: u32, required: u32 },
    /// Direction confirmed. `flipped` if it reversed the previous side.
    Confirmed { side: Side, flipped: bool },
    /// Opposite-side confirmation too weak to re-arm.
    FlipRejected { side: Side, required_magnitude: f64 },
}

impl DebounceVerdict {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DebounceGuard {
    confirm_ticks: u32,
    flip_margin: f64,
}

impl DebounceGuard {
    pub fn new(confirm_ticks: u32, flip_margin: f64) -> Self {
        Self {
            confirm_ticks: confirm_ticks.max(1),
            flip_margin,
        }
    }

    pub fn observe(
        &self,
        state: &mut DebounceState,
        direction: Direction,
        magnitude: f64,
    ) -> DebounceVerdict {
        let Some(side) = direction.side() else {
            state.streak_side = None;
            state.streak = 0;
            return DebounceVerdict::Idle;
        };

        if state.streak_side == Some(side) {
            state.streak = state.streak.saturating_add(1);
        } else {
            state.streak_side = Some(side);
            state.streak = 1;
        }

        if state.streak < self.confirm_ticks {
            return DebounceVerdict::Pending {
                streak: state.streak,
                required: self.confirm_ticks,
            };
        }

        match state.last_confirmed {
            Some((prev_side, prev_mag)) if prev_side != side => {
                let required = prev_mag * (1.0 + self.flip_margin);
                if magnitude >= required {
                    DebounceVerdict::Confirmed {
                        side,
                        flipped: true,
                    }
                } else {
                    DebounceVerdict::FlipRejected {
                        side,
                        required_magnitude: required,
                    }
                }
            }
            _ => DebounceVerdict::Confirmed {
                side,
                flipped: false,
            },
        }
    }

    /// Record an admitted signal as the reference for later flips.
    pub fn commit(&self, state: &mut DebounceState, side: Side, magnitude: f64) {
        state.last_confirmed = Some((side, magnitude));
    }
}
