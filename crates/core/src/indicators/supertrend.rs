//! SuperTrend — ATR-band trend indicator, streaming form.
//!
//! Wilder-smoothed ATR with band carry: the upper band only tightens while
//! price stays below it, the lower band only tightens while price stays
//! above. Direction flips when the close crosses the active band, at most
//! once per closed candle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::events::Candle;
use crate::indicators::TrendDirection;

/// Result of folding one closed candle into the indicator.
#[derive(Debug, Clone, Copy)]
pub struct SuperTrendUpdate {
    /// The active band: lower band in an uptrend, upper band in a downtrend.
    pub value: Decimal,
    pub direction: TrendDirection,
    /// True when this candle flipped the direction.
    pub flipped: bool,
}

#[derive(Debug, Clone)]
pub struct SuperTrend {
    period: usize,
    multiplier: Decimal,

    seed_trs: Vec<Decimal>,
    atr: Option<Decimal>,
    prev_close: Option<Decimal>,
    final_upper: Option<Decimal>,
    final_lower: Option<Decimal>,

    direction: Option<TrendDirection>,
    flipped_at: Option<DateTime<Utc>>,
    last_boundary: Option<DateTime<Utc>>,
}

impl SuperTrend {
    /// # Panics
    /// Panics if `period` is zero.
    #[must_use]
    pub fn new(period: usize, multiplier: Decimal) -> Self {
        assert!(period >= 1, "SuperTrend period must be >= 1");
        Self {
            period,
            multiplier,
            seed_trs: Vec::with_capacity(period),
            atr: None,
            prev_close: None,
            final_upper: None,
            final_lower: None,
            direction: None,
            flipped_at: None,
            last_boundary: None,
        }
    }

    /// Fold one closed candle. Returns `None` during warm-up (the first
    /// `period` candles).
    ///
    /// Candles must arrive in strictly increasing boundary order; a repeated
    /// or regressed boundary is refused so a direction can flip at most once
    /// per boundary.
    pub fn update(&mut self, candle: &Candle) -> Option<SuperTrendUpdate> {
        if let Some(last) = self.last_boundary {
            if candle.boundary_start <= last {
                tracing::error!(
                    boundary = %candle.boundary_start,
                    last = %last,
                    "out-of-order candle refused by SuperTrend"
                );
                return None;
            }
        }
        self.last_boundary = Some(candle.boundary_start);

        let tr = self.true_range(candle);
        let prev_close = self.prev_close;
        self.prev_close = Some(candle.close);

        let atr = match self.atr {
            None => {
                self.seed_trs.push(tr);
                if self.seed_trs.len() < self.period {
                    return None;
                }
                let sum: Decimal = self.seed_trs.iter().copied().sum();
                let seeded = sum / Decimal::from(self.period as u64);
                self.atr = Some(seeded);
                seeded
            }
            Some(prev_atr) => {
                let next =
                    (prev_atr * Decimal::from(self.period as u64 - 1) + tr)
                        / Decimal::from(self.period as u64);
                self.atr = Some(next);
                next
            }
        };

        let hl2 = candle.hl2();
        let basic_upper = hl2 + self.multiplier * atr;
        let basic_lower = hl2 - self.multiplier * atr;

        let final_upper = match (self.final_upper, prev_close) {
            (Some(prev_fu), Some(pc)) if !(basic_upper < prev_fu || pc > prev_fu) => prev_fu,
            _ => basic_upper,
        };
        let final_lower = match (self.final_lower, prev_close) {
            (Some(prev_fl), Some(pc)) if !(basic_lower > prev_fl || pc < prev_fl) => prev_fl,
            _ => basic_lower,
        };
        self.final_upper = Some(final_upper);
        self.final_lower = Some(final_lower);

        let (direction, flipped) = match self.direction {
            None => {
                // Initial reading, not a flip: nothing to reverse from.
                let dir = if candle.close >= final_upper {
                    TrendDirection::Up
                } else {
                    TrendDirection::Down
                };
                (dir, false)
            }
            Some(TrendDirection::Up) if candle.close < final_lower => (TrendDirection::Down, true),
            Some(TrendDirection::Down) if candle.close > final_upper => (TrendDirection::Up, true),
            Some(dir) => (dir, false),
        };

        self.direction = Some(direction);
        if flipped {
            self.flipped_at = Some(candle.boundary_start);
        }

        let value = match direction {
            TrendDirection::Up => final_lower,
            TrendDirection::Down => final_upper,
        };

        Some(SuperTrendUpdate {
            value,
            direction,
            flipped,
        })
    }

    fn true_range(&self, candle: &Candle) -> Decimal {
        let range = candle.high - candle.low;
        match self.prev_close {
            None => range,
            Some(pc) => range
                .max((candle.high - pc).abs())
                .max((candle.low - pc).abs()),
        }
    }

    /// Current direction, `None` until warm-up completes.
    #[must_use]
    pub const fn direction(&self) -> Option<TrendDirection> {
        self.direction
    }

    /// Boundary of the candle that last flipped the direction.
    #[must_use]
    pub const fn flipped_at(&self) -> Option<DateTime<Utc>> {
        self.flipped_at
    }

    /// Drop all state, e.g. at session-day rollover.
    pub fn reset(&mut self) {
        let (period, multiplier) = (self.period, self.multiplier);
        *self = Self::new(period, multiplier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(n: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            interval_secs: 5,
            boundary_start: Utc.timestamp_opt(1000 + n * 5, 0).unwrap(),
            open: close,
            high,
            low,
            close,
        }
    }

    #[test]
    fn warm_up_emits_nothing_until_period_candles() {
        let mut st = SuperTrend::new(3, dec!(2));
        assert!(st.update(&candle(0, dec!(102), dec!(98), dec!(100))).is_none());
        assert!(st.update(&candle(1, dec!(103), dec!(99), dec!(101))).is_none());
        assert!(st
            .update(&candle(2, dec!(104), dec!(100), dec!(102)))
            .is_some());
        assert!(st.direction().is_some());
    }

    #[test]
    fn first_direction_is_sign_of_close_minus_upper_band() {
        // period 1, multiplier 1: upper = hl2 + atr; close below it.
        let mut st = SuperTrend::new(1, dec!(1));
        let update = st.update(&candle(0, dec!(110), dec!(100), dec!(105))).unwrap();
        assert_eq!(update.direction, TrendDirection::Down);
        assert!(!update.flipped);
        assert!(st.flipped_at().is_none());
    }

    #[test]
    fn first_direction_tie_goes_up() {
        // multiplier 0 makes upper == hl2 == close.
        let mut st = SuperTrend::new(1, dec!(0));
        let update = st.update(&candle(0, dec!(110), dec!(90), dec!(100))).unwrap();
        assert_eq!(update.direction, TrendDirection::Up);
    }

    #[test]
    fn rally_through_carried_upper_band_flips_up() {
        let mut st = SuperTrend::new(2, dec!(1));
        st.update(&candle(0, dec!(102), dec!(98), dec!(101)));
        let u1 = st.update(&candle(1, dec!(103), dec!(99), dec!(102))).unwrap();
        // atr = 4, hl2 = 101 -> upper 105; close 102 below it.
        assert_eq!(u1.direction, TrendDirection::Down);
        assert_eq!(u1.value, dec!(105));

        // Strong rally: close clears the carried upper band.
        let u2 = st.update(&candle(2, dec!(120), dec!(110), dec!(119))).unwrap();
        assert_eq!(u2.direction, TrendDirection::Up);
        assert!(u2.flipped);
        assert_eq!(
            st.flipped_at().unwrap(),
            Utc.timestamp_opt(1010, 0).unwrap()
        );

        // Consolidation keeps the trend; no second flip.
        let u3 = st.update(&candle(3, dec!(121), dec!(117), dec!(118))).unwrap();
        assert_eq!(u3.direction, TrendDirection::Up);
        assert!(!u3.flipped);
        assert_eq!(
            st.flipped_at().unwrap(),
            Utc.timestamp_opt(1010, 0).unwrap()
        );
    }

    #[test]
    fn uptrend_band_rides_below_price() {
        let mut st = SuperTrend::new(3, dec!(2));
        let mut last = None;
        for i in 0..12 {
            let base = Decimal::from(100 + i * 2);
            last = st.update(&candle(
                i64::from(i),
                base + dec!(3),
                base - dec!(3),
                base + dec!(1),
            ));
        }
        let update = last.unwrap();
        if update.direction == TrendDirection::Up {
            assert!(update.value < dec!(123));
        }
    }

    #[test]
    fn repeated_boundary_is_refused() {
        let mut st = SuperTrend::new(1, dec!(1));
        let c = candle(0, dec!(110), dec!(100), dec!(105));
        assert!(st.update(&c).is_some());
        let dir_before = st.direction();
        assert!(st.update(&c).is_none());
        assert_eq!(st.direction(), dir_before);
    }

    #[test]
    fn reset_requires_fresh_warm_up() {
        let mut st = SuperTrend::new(2, dec!(1));
        st.update(&candle(0, dec!(102), dec!(98), dec!(101)));
        st.update(&candle(1, dec!(103), dec!(99), dec!(102)));
        assert!(st.direction().is_some());
        st.reset();
        assert!(st.direction().is_none());
        assert!(st.update(&candle(2, dec!(104), dec!(100), dec!(103))).is_none());
    }
}
