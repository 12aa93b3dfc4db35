//! The at-most-one open position and the per-day risk book.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::OptionContract;

/// Position lifecycle. Exactly one state at a time; `Open -> Closed` always
/// passes through `Closing` with a confirmed SELL fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Why a position was (or is being) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    DailyMaxLoss,
    MaxLossPerTrade,
    InitialStop,
    Target,
    TrailingStop,
    Reversal,
    ForceSquareoff,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyMaxLoss => write!(f, "Daily Max Loss"),
            Self::MaxLossPerTrade => write!(f, "Max Loss Per Trade"),
            Self::InitialStop => write!(f, "Initial SL"),
            Self::Target => write!(f, "Target"),
            Self::TrailingStop => write!(f, "Trail SL"),
            Self::Reversal => write!(f, "Reversal"),
            Self::ForceSquareoff => write!(f, "Force Squareoff"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Risk anchors attached to an open position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAnchors {
    pub initial_stop: Option<Decimal>,
    pub trailing_stop: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub max_loss_rupees: Option<Decimal>,
    pub high_water_mark: Option<Decimal>,
}

/// A long option position held by one strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub contract: OptionContract,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    /// Absolute contracts: lots * lot_size. Always positive.
    pub qty: u32,
    pub anchors: RiskAnchors,
    pub open_order_id: String,
    /// Single-assignment: once a SELL is in flight its id stays here and all
    /// further exit requests coalesce.
    pub exit_order_id: Option<String>,
    pub state: PositionState,
}

impl Position {
    #[must_use]
    pub fn unrealized_pnl(&self, ltp: Decimal) -> Decimal {
        (ltp - self.entry_price) * Decimal::from(self.qty)
    }

    #[must_use]
    pub fn held_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_time).num_seconds()
    }

    /// Record the in-flight SELL order id. Returns false (and leaves the
    /// existing id untouched) when one is already assigned.
    pub fn assign_exit_order(&mut self, order_id: String) -> bool {
        if self.exit_order_id.is_some() {
            return false;
        }
        self.exit_order_id = Some(order_id);
        true
    }

    /// Derived lots for reporting.
    #[must_use]
    pub fn lots(&self) -> u32 {
        let lot_size = self.contract.root.lot_size();
        if lot_size == 0 {
            return 0;
        }
        self.qty / lot_size
    }
}

/// Per-day, per-strategy risk accounting. Rolls at 00:00 IST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBook {
    pub day_ist: NaiveDate,
    pub realized_pnl_today: Decimal,
    pub trades_taken_today: u32,
    pub daily_loss_tripped: bool,
}

impl RiskBook {
    #[must_use]
    pub fn new(day_ist: NaiveDate) -> Self {
        Self {
            day_ist,
            realized_pnl_today: Decimal::ZERO,
            trades_taken_today: 0,
            daily_loss_tripped: false,
        }
    }

    /// Reset for a new IST trading date. Returns true when a rollover
    /// happened.
    pub fn roll(&mut self, today_ist: NaiveDate) -> bool {
        if today_ist == self.day_ist {
            return false;
        }
        *self = Self::new(today_ist);
        true
    }

    /// Record a confirmed entry fill.
    pub fn record_entry(&mut self) {
        self.trades_taken_today += 1;
    }

    /// Fold a journaled close into the day's realized P&L.
    pub fn record_close(&mut self, realized_pnl: Decimal) {
        self.realized_pnl_today += realized_pnl;
    }

    pub fn trip_daily_loss(&mut self) {
        self.daily_loss_tripped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexKind, OptionSide};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position {
            trade_id: "t-1".to_string(),
            contract: OptionContract {
                root: IndexKind::Nifty,
                expiry: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
                strike: dec!(23500),
                side: OptionSide::Call,
                security_id: "12345".to_string(),
            },
            entry_time: Utc.with_ymd_and_hms(2026, 8, 5, 4, 30, 0).unwrap(),
            entry_price: dec!(100),
            qty: 50,
            anchors: RiskAnchors::default(),
            open_order_id: "o-1".to_string(),
            exit_order_id: None,
            state: PositionState::Open,
        }
    }

    #[test]
    fn unrealized_pnl_scales_by_qty() {
        let pos = position();
        assert_eq!(pos.unrealized_pnl(dec!(109)), dec!(450));
        assert_eq!(pos.unrealized_pnl(dec!(94)), dec!(-300));
    }

    #[test]
    fn exit_order_is_single_assignment() {
        let mut pos = position();
        assert!(pos.assign_exit_order("s-1".to_string()));
        assert!(!pos.assign_exit_order("s-2".to_string()));
        assert_eq!(pos.exit_order_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn lots_derive_from_qty_and_lot_size() {
        let pos = position();
        assert_eq!(pos.lots(), 1);
    }

    #[test]
    fn risk_book_rolls_only_on_new_date() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        let mut book = RiskBook::new(day);
        book.record_entry();
        book.record_close(dec!(-500));
        book.trip_daily_loss();

        assert!(!book.roll(day));
        assert!(book.daily_loss_tripped);

        let next = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert!(book.roll(next));
        assert_eq!(book.trades_taken_today, 0);
        assert_eq!(book.realized_pnl_today, Decimal::ZERO);
        assert!(!book.daily_loss_tripped);
    }

    #[test]
    fn exit_reason_strings_match_journal_values() {
        assert_eq!(ExitReason::DailyMaxLoss.to_string(), "Daily Max Loss");
        assert_eq!(ExitReason::TrailingStop.to_string(), "Trail SL");
        assert_eq!(ExitReason::ForceSquareoff.to_string(), "Force Squareoff");
    }
}
