// =============================================================================
// Trading Schedule: time-of-day windows with midnight wraparound
// =============================================================================
//
// A schedule is a set of minute-of-day windows plus an enabled-weekday set,
// evaluated in a fixed UTC offset.
//
//   - Empty weekday set  => every weekday is enabled.
//   - Empty window list  => every minute of the day is inside a window.
//   - `end < start`      => the window wraps past midnight (22:00-06:00).
//
// For the post-midnight part of a wrapping window the session belongs to the
// day it started on, so the weekday check is made against the previous day.
// =============================================================================

use anyhow::{bail, ensure, Context, Result};
use chrono::{Datelike, FixedOffset, Offset, TimeZone, Timelike, Utc, Weekday};

use crate::config::{ScheduleConfig, WindowConfig};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Half-open `[start, end)` minute-of-day interval. Wraps when `end < start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteWindow {
    start: u16,
    end: u16,
}

impl MinuteWindow {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        ensure!(start < MINUTES_PER_DAY, "window start minute {start} out of range");
        ensure!(end <= MINUTES_PER_DAY, "window end minute {end} out of range");
        ensure!(start != end, "window start and end are equal ({start})");
        Ok(Self { start, end })
    }

    pub fn wraps(&self) -> bool {
        self.end < self.start
    }

    /// Day offset of the session containing `minute`: `Some(0)` for a session
    /// that started today, `Some(-1)` for the tail of a session that started
    /// yesterday, `None` if outside.
    fn session_day_offset(&self, minute: u16) -> Option<i8> {
        if self.wraps() {
            if minute >= self.start {
                Some(0)
            } else if minute < self.end {
                Some(-1)
            } else {
                None
            }
        } else if (self.start..self.end).contains(&minute) {
            Some(0)
        } else {
            None
        }
    }

    /// Non-wrapping segments covered by this window.
    fn segments(&self) -> Vec<(u16, u16)> {
        if self.wraps() {
            let mut segs = vec![(self.start, MINUTES_PER_DAY)];
            if self.end > 0 {
                segs.push((0, self.end));
            }
            segs
        } else {
            vec![(self.start, self.end)]
        }
    }

    fn overlaps(&self, other: &MinuteWindow) -> bool {
        self.segments().iter().any(|&(a0, a1)| {
            other
                .segments()
                .iter()
                .any(|&(b0, b1)| a0 < b1 && b0 < a1)
        })
    }
}

/// Parse `"HH:MM"` into a minute of day. `"24:00"` is accepted only when
/// `allow_end_of_day` is set.
fn parse_hhmm(s: &str, allow_end_of_day: bool) -> Result<u16> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .with_context(|| format!("time '{s}' is not in HH:MM form"))?;
    let h: u16 = h.parse().with_context(|| format!("invalid hour in '{s}'"))?;
    let m: u16 = m.parse().with_context(|| format!("invalid minute in '{s}'"))?;
    ensure!(m < 60, "invalid minute in '{s}'");
    if h == 24 && m == 0 && allow_end_of_day {
        return Ok(MINUTES_PER_DAY);
    }
    ensure!(h < 24, "invalid hour in '{s}'");
    Ok(h * 60 + m)
}

fn parse_window(w: &WindowConfig) -> Result<MinuteWindow> {
    let start = parse_hhmm(&w.start, false)?;
    let end = parse_hhmm(&w.end, true)?;
    MinuteWindow::new(start, end).with_context(|| format!("invalid window {}-{}", w.start, w.end))
}

// =============================================================================
// Schedule
// =============================================================================

/// Parsed, validated schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Bit `i` set => weekday with `num_days_from_monday() == i` enabled.
    /// Zero means every day is enabled.
    weekday_mask: u8,
    windows: Vec<MinuteWindow>,
    offset: FixedOffset,
}

impl Schedule {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        let mut weekday_mask = 0u8;
        for name in &cfg.weekdays {
            let day: Weekday = match name.trim().parse() {
                Ok(d) => d,
                Err(_) => bail!("unknown weekday '{name}'"),
            };
            weekday_mask |= 1 << day.num_days_from_monday();
        }

        let windows = cfg
            .windows
            .iter()
            .map(parse_window)
            .collect::<Result<Vec<_>>>()?;

        for (i, a) in windows.iter().enumerate() {
            for (j, b) in windows.iter().enumerate().skip(i + 1) {
                if a.overlaps(b) {
                    bail!(
                        "schedule windows overlap: {}-{} and {}-{}",
                        cfg.windows[i].start,
                        cfg.windows[i].end,
                        cfg.windows[j].start,
                        cfg.windows[j].end
                    );
                }
            }
        }

        let offset = FixedOffset::east_opt(cfg.utc_offset_minutes * 60)
            .with_context(|| format!("invalid utc offset {} minutes", cfg.utc_offset_minutes))?;

        Ok(Self {
            weekday_mask,
            windows,
            offset,
        })
    }

    /// Schedule that is active at every instant.
    pub fn always() -> Self {
        Self {
            weekday_mask: 0,
            windows: Vec::new(),
            offset: Utc.fix(),
        }
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn weekday_enabled(&self, day: Weekday) -> bool {
        self.weekday_mask == 0 || self.weekday_mask & (1 << day.num_days_from_monday()) != 0
    }

    /// Schedule trigger for an epoch-millisecond timestamp.
    pub fn is_active(&self, ts_ms: i64) -> bool {
        let Some(local) = self.offset.timestamp_millis_opt(ts_ms).single() else {
            return false;
        };
        let today = local.weekday();

        if self.windows.is_empty() {
            return self.weekday_enabled(today);
        }

        let minute = (local.hour() * 60 + local.minute()) as u16;
        self.windows.iter().any(|w| match w.session_day_offset(minute) {
            Some(0) => self.weekday_enabled(today),
            Some(_) => self.weekday_enabled(today.pred()),
            None => false,
        })
    }
}
