//! Tick-to-candle aggregation with fixed boundary alignment.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::events::Candle;

/// Folds ticks into fixed-interval OHLC candles.
///
/// One aggregator per instrument. Boundaries are aligned to
/// `floor(epoch / interval) * interval`, not to engine start, so candles from
/// any run line up with exchange wall time. On engine start the first tick
/// opens a fresh candle; partial pre-start candles are never reconstructed.
#[derive(Debug)]
pub struct CandleAggregator {
    interval_secs: u32,
    current: Option<Candle>,
}

impl CandleAggregator {
    /// # Panics
    /// Panics if `interval_secs` is zero.
    #[must_use]
    pub fn new(interval_secs: u32) -> Self {
        assert!(interval_secs > 0, "candle interval must be positive");
        Self {
            interval_secs,
            current: None,
        }
    }

    /// Fold one tick. Returns the completed candle when the tick crosses a
    /// boundary.
    ///
    /// A tick whose boundary precedes the in-progress candle is refused (the
    /// candle store is strictly ordered); it is logged and dropped.
    pub fn update(&mut self, at: DateTime<Utc>, price: Decimal) -> Option<Candle> {
        let boundary = self.boundary_for(at);

        let Some(current) = self.current.as_mut() else {
            self.current = Some(Candle::open_at(boundary, self.interval_secs, price));
            return None;
        };

        if boundary == current.boundary_start {
            current.fold(price);
            return None;
        }

        if boundary < current.boundary_start {
            tracing::error!(
                tick_boundary = %boundary,
                current_boundary = %current.boundary_start,
                "tick boundary regressed; dropping tick"
            );
            return None;
        }

        self.current
            .replace(Candle::open_at(boundary, self.interval_secs, price))
    }

    /// Boundary start for an instant.
    #[must_use]
    pub fn boundary_for(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::from(self.interval_secs);
        let floored = at.timestamp().div_euclid(secs) * secs;
        Utc.timestamp_opt(floored, 0).single().unwrap_or(at)
    }

    /// Discard any in-progress candle. Used on config changes that alter the
    /// interval.
    pub fn reset(&mut self) {
        self.current = None;
    }

    #[must_use]
    pub const fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    /// The in-progress (unclosed) candle, if any.
    #[must_use]
    pub const fn in_progress(&self) -> Option<&Candle> {
        self.current.as_ref()
    }
}
