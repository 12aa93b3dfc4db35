//! Value types published by the engine: candles, the event stream, and the
//! state snapshot. Everything here is cloned at emission time; subscribers
//! never share mutable state with the loop.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::ExitReason;
use crate::types::{IndexKind, OptionSide};

/// A fixed-interval OHLC candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub interval_secs: u32,
    pub boundary_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    pub(crate) fn open_at(boundary_start: DateTime<Utc>, interval_secs: u32, price: Decimal) -> Self {
        Self {
            interval_secs,
            boundary_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    pub(crate) fn fold(&mut self, price: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }

    /// Midpoint of the candle's range, the SuperTrend band anchor.
    #[must_use]
    pub fn hl2(&self) -> Decimal {
        (self.high + self.low) / Decimal::from(2)
    }
}

/// Events streamed to subscribers. Best-effort: slow subscribers are dropped
/// by the broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Index candle completed, with the indicator state after the update.
    CandleClosed {
        candle: Candle,
        supertrend: Option<Decimal>,
        direction: Option<i8>,
    },

    /// SuperTrend direction changed on a closed candle.
    SignalFlip {
        boundary: DateTime<Utc>,
        direction: i8,
    },

    /// Order handed to the broker.
    OrderPlaced {
        broker_order_id: String,
        action: String,
        qty: u32,
        client_tag: String,
    },

    /// Broker confirmed a fill.
    OrderFilled {
        broker_order_id: String,
        action: String,
        price: Decimal,
    },

    /// Position opened (BUY fill confirmed and journaled).
    PositionOpened {
        trade_id: String,
        side: OptionSide,
        strike: Decimal,
        entry_price: Decimal,
        qty: u32,
    },

    /// Position closed (SELL fill confirmed and journaled).
    PositionClosed {
        trade_id: String,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: ExitReason,
    },

    /// An eligible entry was not taken.
    EntrySkipped {
        at: DateTime<Utc>,
        reason: String,
    },

    /// Non-fatal engine error surfaced to observers.
    Error {
        at: DateTime<Utc>,
        message: String,
    },
}

/// The most recent notable engine action, surfaced in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastAction {
    pub kind: String,
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// +1 bullish, -1 bearish, None while warming up.
    pub direction: Option<i8>,
    pub flipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub side: OptionSide,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub entry_price: Decimal,
    pub qty: u32,
    pub unrealized_pnl: Decimal,
    pub initial_stop: Option<Decimal>,
    pub trailing_stop: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub high_water_mark: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskBookSnapshot {
    pub realized_pnl_today: Decimal,
    pub trades_taken_today: u32,
    pub daily_loss_tripped: bool,
}

/// Immutable engine state snapshot, published once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub strategy_instance_id: String,
    pub mode: crate::config::TradeMode,
    pub root: IndexKind,
    pub running: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_candle_boundary_at: Option<DateTime<Utc>>,
    pub indicator: IndicatorSnapshot,
    pub position: Option<PositionSnapshot>,
    pub risk_book: RiskBookSnapshot,
    pub last_action: Option<LastAction>,
}

impl Snapshot {
    /// An idle snapshot for an engine that has not ticked yet.
    #[must_use]
    pub fn idle(strategy_instance_id: String, mode: crate::config::TradeMode, root: IndexKind) -> Self {
        Self {
            strategy_instance_id,
            mode,
            root,
            running: false,
            last_tick_at: None,
            last_candle_boundary_at: None,
            indicator: IndicatorSnapshot {
                direction: None,
                flipped_at: None,
            },
            position: None,
            risk_book: RiskBookSnapshot {
                realized_pnl_today: Decimal::ZERO,
                trades_taken_today: 0,
                daily_loss_tripped: false,
            },
            last_action: None,
        }
    }
}
