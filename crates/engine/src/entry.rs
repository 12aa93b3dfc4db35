//! Entry gating and signal translation, run on index candle close when no
//! position is on the books.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use trend_trade_core::indicators::SuperTrendUpdate;
use trend_trade_core::{session, EngineConfig, Macd, OptionSide, RiskBook, TrendDirection};

/// A fully sized entry candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySignal {
    pub side: OptionSide,
    pub strike: Decimal,
    pub lots: u32,
    pub qty: u32,
}

/// Outcome of the entry evaluator. Skips carry the gate that stopped them
/// so the actor can surface it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    Enter(EntrySignal),
    Skip(&'static str),
}

/// Evaluate the entry gates against a just-closed index candle.
///
/// `candles_since_exit` is `None` before the first exit of the day.
/// `htf_direction` is the higher-timeframe SuperTrend reading (`None` while
/// it warms up); it is only consulted when the HTF filter engages.
#[must_use]
pub fn evaluate_entry(
    config: &EngineConfig,
    book: &RiskBook,
    now: DateTime<Utc>,
    update: &SuperTrendUpdate,
    macd: &Macd,
    htf_direction: Option<TrendDirection>,
    candles_since_exit: Option<u32>,
    spot_at_close: Decimal,
) -> EntryDecision {
    if !session::within_entry_window(now, config.entry_open_ist, config.entry_close_ist) {
        return EntryDecision::Skip("outside entry window");
    }
    if book.daily_loss_tripped {
        return EntryDecision::Skip("daily loss tripped");
    }
    if book.trades_taken_today >= config.max_trades_per_day {
        return EntryDecision::Skip("max trades per day reached");
    }
    if let Some(gap) = candles_since_exit {
        if gap < config.min_gap_candles_between_trades {
            return EntryDecision::Skip("gap candles since last exit");
        }
    }
    if !update.flipped {
        return EntryDecision::Skip("no flip at this boundary");
    }

    let side = match update.direction {
        TrendDirection::Up => OptionSide::Call,
        TrendDirection::Down => OptionSide::Put,
    };

    if config.htf_filter_active() {
        match htf_direction {
            None => return EntryDecision::Skip("htf supertrend not ready"),
            Some(d) if d != update.direction => return EntryDecision::Skip("htf filter mismatch"),
            Some(_) => {}
        }
    }

    if config.use_macd && !macd.confirms(update.direction) {
        return EntryDecision::Skip("macd unconfirmed");
    }

    let strike = config.root.atm_strike(spot_at_close);
    let lots = size_lots(config);
    let qty = lots * config.root.lot_size();

    EntryDecision::Enter(EntrySignal {
        side,
        strike,
        lots,
        qty,
    })
}

/// Risk-based sizing: `floor(risk / (stop_points * lot_size))` lots, floored
/// at one lot. Falls back to the configured lot count when risk sizing is
/// disabled.
#[must_use]
pub fn size_lots(config: &EngineConfig) -> u32 {
    if config.risk_per_trade_rupees <= Decimal::ZERO {
        return config.configured_lots;
    }
    let per_lot_risk = config.initial_stop_points * Decimal::from(config.root.lot_size());
    if per_lot_risk <= Decimal::ZERO {
        return config.configured_lots;
    }
    let lots = (config.risk_per_trade_rupees / per_lot_risk)
        .floor()
        .to_u32()
        .unwrap_or(0);
    lots.max(1)
}
