//! MACD — EMA(fast) − EMA(slow) with an EMA(signal) line.
//!
//! Used only as an optional entry confirmation: an entry candidate is
//! confirmed when the histogram carries the candidate's sign.

use rust_decimal::Decimal;

use crate::indicators::TrendDirection;

/// Streaming EMA, seeded with the simple average of the first `period`
/// values.
#[derive(Debug, Clone)]
struct Ema {
    period: usize,
    seed_sum: Decimal,
    seed_count: usize,
    value: Option<Decimal>,
}

impl Ema {
    fn new(period: usize) -> Self {
        Self {
            period,
            seed_sum: Decimal::ZERO,
            seed_count: 0,
            value: None,
        }
    }

    fn update(&mut self, x: Decimal) -> Option<Decimal> {
        match self.value {
            None => {
                self.seed_sum += x;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    self.value = Some(self.seed_sum / Decimal::from(self.period as u64));
                }
            }
            Some(prev) => {
                let alpha = Decimal::from(2) / Decimal::from(self.period as u64 + 1);
                self.value = Some(x * alpha + prev * (Decimal::ONE - alpha));
            }
        }
        self.value
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MacdUpdate {
    pub macd_line: Decimal,
    pub signal_line: Decimal,
    pub histogram: Decimal,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    last: Option<MacdUpdate>,
}

impl Macd {
    /// # Panics
    /// Panics unless `0 < fast < slow` and `signal > 0`.
    #[must_use]
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast > 0 && signal > 0, "MACD periods must be positive");
        assert!(fast < slow, "MACD fast period must be shorter than slow");
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            last: None,
        }
    }

    /// Fold one close. Returns `None` until both the slow EMA and the signal
    /// EMA have seeded.
    pub fn update(&mut self, close: Decimal) -> Option<MacdUpdate> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => return None,
        };
        let macd_line = fast - slow;
        let signal_line = self.signal.update(macd_line)?;
        let update = MacdUpdate {
            macd_line,
            signal_line,
            histogram: macd_line - signal_line,
        };
        self.last = Some(update);
        Some(update)
    }

    /// True when the histogram sign agrees with the candidate direction.
    /// A flat or unwarmed histogram confirms nothing.
    #[must_use]
    pub fn confirms(&self, direction: TrendDirection) -> bool {
        match self.last {
            Some(u) => match direction {
                TrendDirection::Up => u.histogram > Decimal::ZERO,
                TrendDirection::Down => u.histogram < Decimal::ZERO,
            },
            None => false,
        }
    }

    pub fn reset(&mut self) {
        let (f, s, g) = (self.fast.period, self.slow.period, self.signal.period);
        *self = Self::new(f, s, g);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn warm_up_needs_slow_plus_signal_closes() {
        let mut macd = Macd::new(2, 3, 2);
        assert!(macd.update(dec!(100)).is_none());
        assert!(macd.update(dec!(101)).is_none());
        // Slow seeds here, first MACD value feeds the signal EMA.
        assert!(macd.update(dec!(102)).is_none());
        // Second MACD value seeds the signal EMA.
        assert!(macd.update(dec!(103)).is_some());
    }

    #[test]
    fn rising_closes_confirm_up_not_down() {
        let mut macd = Macd::new(2, 4, 3);
        for i in 0..20 {
            macd.update(Decimal::from(100 + i * 2));
        }
        assert!(macd.confirms(TrendDirection::Up));
        assert!(!macd.confirms(TrendDirection::Down));
    }

    #[test]
    fn falling_closes_confirm_down() {
        let mut macd = Macd::new(2, 4, 3);
        for i in 0..20 {
            macd.update(Decimal::from(200 - i * 3));
        }
        assert!(macd.confirms(TrendDirection::Down));
        assert!(!macd.confirms(TrendDirection::Up));
    }

    #[test]
    fn unwarmed_macd_confirms_nothing() {
        let macd = Macd::new(12, 26, 9);
        assert!(!macd.confirms(TrendDirection::Up));
        assert!(!macd.confirms(TrendDirection::Down));
    }

    #[test]
    fn reset_clears_state() {
        let mut macd = Macd::new(2, 3, 2);
        for i in 0..10 {
            macd.update(Decimal::from(100 + i));
        }
        macd.reset();
        assert!(!macd.confirms(TrendDirection::Up));
        assert!(macd.update(dec!(100)).is_none());
    }
}
