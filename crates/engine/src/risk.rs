//! Exit rules, evaluated in a fixed priority order.
//!
//! Tick-level rules run on every option LTP; the reversal rule runs on index
//! candle close; force-flat runs on wall time and overrides everything. The
//! evaluators are pure apart from trailing-anchor updates on the position —
//! the actor owns execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use trend_trade_core::{
    EngineConfig, ExitReason, OptionSide, Position, RiskBook, TrendDirection,
};

/// Tick-priority chain: daily max loss, per-trade max loss, initial stop,
/// target, trailing stop. First match wins. Updates the trailing anchors as
/// a side effect even when nothing fires.
pub fn evaluate_tick_exit(
    config: &EngineConfig,
    book: &RiskBook,
    position: &mut Position,
    ltp: Decimal,
) -> Option<ExitReason> {
    let unrealized = position.unrealized_pnl(ltp);

    if config.daily_max_loss_rupees > Decimal::ZERO
        && book.realized_pnl_today + unrealized <= -config.daily_max_loss_rupees
    {
        return Some(ExitReason::DailyMaxLoss);
    }

    if config.max_loss_per_trade_rupees > Decimal::ZERO
        && unrealized <= -config.max_loss_per_trade_rupees
    {
        return Some(ExitReason::MaxLossPerTrade);
    }

    if config.initial_stop_points > Decimal::ZERO
        && ltp <= position.entry_price - config.initial_stop_points
    {
        return Some(ExitReason::InitialStop);
    }

    if config.target_points > Decimal::ZERO
        && ltp >= position.entry_price + config.target_points
    {
        return Some(ExitReason::Target);
    }

    if config.trail_start_points > Decimal::ZERO && config.trail_step_points > Decimal::ZERO {
        update_trailing_stop(config, position, ltp);
        if let Some(trail) = position.anchors.trailing_stop {
            if ltp <= trail {
                return Some(ExitReason::TrailingStop);
            }
        }
    }

    None
}

/// Trailing anchor maintenance: arm once profit reaches `trail_start_points`,
/// then ratchet with the high-water mark. The stop never moves down.
fn update_trailing_stop(config: &EngineConfig, position: &mut Position, ltp: Decimal) {
    let anchors = &mut position.anchors;
    match anchors.high_water_mark {
        None => {
            if ltp - position.entry_price >= config.trail_start_points {
                anchors.high_water_mark = Some(ltp);
                anchors.trailing_stop = Some(ltp - config.trail_step_points);
            }
        }
        Some(hwm) if ltp > hwm => {
            anchors.high_water_mark = Some(ltp);
            let candidate = ltp - config.trail_step_points;
            anchors.trailing_stop = Some(match anchors.trailing_stop {
                Some(existing) => existing.max(candidate),
                None => candidate,
            });
        }
        Some(_) => {}
    }
}

/// Candle-close reversal: held side disagrees with the new direction, and
/// the position has been held for at least `min_hold_secs`. Lower priority
/// than any tick rule that fired in the same cycle.
#[must_use]
pub fn evaluate_reversal(
    config: &EngineConfig,
    position: &Position,
    direction: TrendDirection,
    now: DateTime<Utc>,
) -> Option<ExitReason> {
    let against = match (position.contract.side, direction) {
        (OptionSide::Call, TrendDirection::Down) | (OptionSide::Put, TrendDirection::Up) => true,
        _ => false,
    };
    if !against {
        return None;
    }
    if config.min_hold_secs > 0 && position.held_secs(now) < config.min_hold_secs as i64 {
        tracing::info!(
            trade_id = %position.trade_id,
            held_secs = position.held_secs(now),
            "reversal blocked by min-hold"
        );
        return None;
    }
    Some(ExitReason::Reversal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{open_position, test_config};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn book_with(realized: Decimal) -> RiskBook {
        let mut book = RiskBook::new(chrono::NaiveDate::from_ymd_opt(2026, 8, 5).unwrap());
        book.record_close(realized);
        book
    }

    #[test]
    fn daily_max_loss_includes_unrealized() {
        // S2: realized -4800, unrealized -300, cap 5000.
        let config = EngineConfig {
            daily_max_loss_rupees: dec!(5000),
            initial_stop_points: Decimal::ZERO,
            ..test_config()
        };
        let book = book_with(dec!(-4800));
        let mut pos = open_position(dec!(100), 50);

        // -300 unrealized on qty 50 => ltp 94.
        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(94)),
            Some(ExitReason::DailyMaxLoss)
        );
        // One rupee shy of the cap does not fire.
        let book_ok = book_with(dec!(-4700));
        assert_eq!(evaluate_tick_exit(&config, &book_ok, &mut pos, dec!(94)), None);
    }

    #[test]
    fn per_trade_loss_fires_after_daily_cap_clears() {
        let config = EngineConfig {
            daily_max_loss_rupees: Decimal::ZERO,
            max_loss_per_trade_rupees: dec!(250),
            initial_stop_points: Decimal::ZERO,
            ..test_config()
        };
        let book = book_with(Decimal::ZERO);
        let mut pos = open_position(dec!(100), 50);
        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(94)),
            Some(ExitReason::MaxLossPerTrade)
        );
    }

    #[test]
    fn initial_stop_fires_at_entry_minus_points() {
        // S3: entry 100, stop 50 points, tick 49.9.
        let config = EngineConfig {
            daily_max_loss_rupees: Decimal::ZERO,
            initial_stop_points: dec!(50),
            ..test_config()
        };
        let book = book_with(Decimal::ZERO);
        let mut pos = open_position(dec!(100), 50);
        assert_eq!(evaluate_tick_exit(&config, &book, &mut pos, dec!(50.1)), None);
        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(49.9)),
            Some(ExitReason::InitialStop)
        );
    }

    #[test]
    fn target_fires_at_entry_plus_points() {
        let config = EngineConfig {
            daily_max_loss_rupees: Decimal::ZERO,
            initial_stop_points: Decimal::ZERO,
            target_points: dec!(20),
            ..test_config()
        };
        let book = book_with(Decimal::ZERO);
        let mut pos = open_position(dec!(100), 50);
        assert_eq!(evaluate_tick_exit(&config, &book, &mut pos, dec!(119.95)), None);
        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(120)),
            Some(ExitReason::Target)
        );
    }

    #[test]
    fn trailing_ladder_matches_the_worked_example() {
        // S4: entry 100, start 10, step 5; ticks 100 -> 112 -> 115 -> 109.
        let config = EngineConfig {
            daily_max_loss_rupees: Decimal::ZERO,
            initial_stop_points: Decimal::ZERO,
            trail_start_points: dec!(10),
            trail_step_points: dec!(5),
            ..test_config()
        };
        let book = book_with(Decimal::ZERO);
        let mut pos = open_position(dec!(100), 50);

        assert_eq!(evaluate_tick_exit(&config, &book, &mut pos, dec!(100)), None);
        assert!(pos.anchors.trailing_stop.is_none());

        assert_eq!(evaluate_tick_exit(&config, &book, &mut pos, dec!(112)), None);
        assert_eq!(pos.anchors.trailing_stop, Some(dec!(107)));
        assert_eq!(pos.anchors.high_water_mark, Some(dec!(112)));

        assert_eq!(evaluate_tick_exit(&config, &book, &mut pos, dec!(115)), None);
        assert_eq!(pos.anchors.trailing_stop, Some(dec!(110)));

        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(109)),
            Some(ExitReason::TrailingStop)
        );
        assert_eq!(pos.unrealized_pnl(dec!(109)), dec!(450));
    }

    #[test]
    fn trailing_stop_never_moves_down() {
        let config = EngineConfig {
            daily_max_loss_rupees: Decimal::ZERO,
            initial_stop_points: Decimal::ZERO,
            trail_start_points: dec!(10),
            trail_step_points: dec!(5),
            ..test_config()
        };
        let book = book_with(Decimal::ZERO);
        let mut pos = open_position(dec!(100), 50);

        evaluate_tick_exit(&config, &book, &mut pos, dec!(115));
        assert_eq!(pos.anchors.trailing_stop, Some(dec!(110)));
        // Pullback above the stop: anchors untouched.
        evaluate_tick_exit(&config, &book, &mut pos, dec!(111));
        assert_eq!(pos.anchors.trailing_stop, Some(dec!(110)));
        assert_eq!(pos.anchors.high_water_mark, Some(dec!(115)));
    }

    #[test]
    fn daily_cap_outranks_every_other_rule() {
        // One tick trips daily loss, per-trade loss and the initial stop;
        // only the daily cap may be reported.
        let config = EngineConfig {
            daily_max_loss_rupees: dec!(1000),
            max_loss_per_trade_rupees: dec!(100),
            initial_stop_points: dec!(10),
            ..test_config()
        };
        let book = book_with(dec!(-900));
        let mut pos = open_position(dec!(100), 50);
        assert_eq!(
            evaluate_tick_exit(&config, &book, &mut pos, dec!(80)),
            Some(ExitReason::DailyMaxLoss)
        );
    }

    #[test]
    fn reversal_requires_opposing_direction() {
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();
        let pos = open_position(dec!(100), 50); // CE

        assert_eq!(evaluate_reversal(&config, &pos, TrendDirection::Up, now), None);
        assert_eq!(
            evaluate_reversal(&config, &pos, TrendDirection::Down, now),
            Some(ExitReason::Reversal)
        );
    }

    #[test]
    fn reversal_respects_min_hold() {
        let config = EngineConfig {
            min_hold_secs: 60,
            ..test_config()
        };
        let pos = open_position(dec!(100), 50);
        let soon = pos.entry_time + chrono::Duration::seconds(30);
        let later = pos.entry_time + chrono::Duration::seconds(60);

        assert_eq!(evaluate_reversal(&config, &pos, TrendDirection::Down, soon), None);
        assert_eq!(
            evaluate_reversal(&config, &pos, TrendDirection::Down, later),
            Some(ExitReason::Reversal)
        );
    }
}
