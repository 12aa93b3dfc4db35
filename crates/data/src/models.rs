//! Journal row models.
//!
//! Prices travel as TEXT in `SQLite` so `Decimal` exactness survives the
//! round trip; the repositories do the conversion at the edge.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trend_trade_core::{IndexKind, OptionSide, TradeMode};

/// The open half of a trade, written only after a confirmed BUY fill.
#[derive(Debug, Clone)]
pub struct TradeOpen {
    pub trade_id: String,
    pub open_at: DateTime<Utc>,
    pub side: OptionSide,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub entry_price: Decimal,
    pub qty: u32,
    pub mode: TradeMode,
    pub root: IndexKind,
}

/// A full journal row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub trade_id: String,
    pub open_at: DateTime<Utc>,
    pub close_at: Option<DateTime<Utc>>,
    pub side: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub qty: u32,
    pub realized_pnl: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub mode: String,
    pub root: String,
}

impl TradeRow {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.close_at.is_some()
    }
}

/// Per-IST-day aggregate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayStatsRow {
    pub date_ist: NaiveDate,
    pub realized_pnl: Decimal,
    pub trades_taken: u32,
    pub daily_loss_tripped: bool,
}
