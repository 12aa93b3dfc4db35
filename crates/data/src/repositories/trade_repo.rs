//! Trade journal repository.
//!
//! Append-only from the engine's point of view: `write_open` creates the
//! row, `write_close` completes it exactly once. Replaying a close for a
//! trade that already closed is a no-op, which is what makes the engine's
//! retry loop safe.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::{TradeOpen, TradeRow};

/// Repository for trade journal operations.
#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: SqlitePool,
}

impl TradeRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the open half of a trade. Re-inserting the same `trade_id`
    /// is a no-op so a crash between commit and publish cannot duplicate.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn write_open(&self, open: &TradeOpen) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trades
                (trade_id, open_at, side, strike, expiry, entry_price, qty, mode, root)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(trade_id) DO NOTHING
            ",
        )
        .bind(&open.trade_id)
        .bind(open.open_at)
        .bind(open.side.to_string())
        .bind(open.strike.to_string())
        .bind(open.expiry)
        .bind(open.entry_price.to_string())
        .bind(i64::from(open.qty))
        .bind(open.mode.to_string())
        .bind(open.root.to_string())
        .execute(&self.pool)
        .await?;

        tracing::info!(trade_id = %open.trade_id, "trade open journaled");
        Ok(())
    }

    /// Completes a trade. Idempotent by `trade_id`: returns true when this
    /// call closed the row, false when the trade was already closed (replay).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn write_close(
        &self,
        trade_id: &str,
        close_at: DateTime<Utc>,
        close_day_ist: NaiveDate,
        exit_price: Decimal,
        realized_pnl: Decimal,
        exit_reason: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE trades
            SET close_at = ?2, close_day_ist = ?3, exit_price = ?4,
                realized_pnl = ?5, exit_reason = ?6
            WHERE trade_id = ?1 AND close_at IS NULL
            ",
        )
        .bind(trade_id)
        .bind(close_at)
        .bind(close_day_ist)
        .bind(exit_price.to_string())
        .bind(realized_pnl.to_string())
        .bind(exit_reason)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            tracing::info!(trade_id = %trade_id, pnl = %realized_pnl, reason = exit_reason, "trade close journaled");
        } else {
            tracing::debug!(trade_id = %trade_id, "trade close replayed; no-op");
        }
        Ok(applied)
    }

    /// Gets a trade by id.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn get(&self, trade_id: &str) -> Result<Option<TradeRow>> {
        let row = sqlx::query(
            r"
            SELECT trade_id, open_at, close_at, side, strike, expiry, entry_price,
                   exit_price, qty, realized_pnl, exit_reason, mode, root
            FROM trades
            WHERE trade_id = ?1
            ",
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_row(&r)).transpose()
    }

    /// Recent trades, newest first.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<TradeRow>> {
        let rows = sqlx::query(
            r"
            SELECT trade_id, open_at, close_at, side, strike, expiry, entry_price,
                   exit_price, qty, realized_pnl, exit_reason, mode, root
            FROM trades
            ORDER BY open_at DESC
            LIMIT ?1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row).collect()
    }

    /// Sum of realized P&L over trades closed on an IST date. The engine's
    /// risk book must agree with this number at all times.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn realized_pnl_for_day(&self, date_ist: NaiveDate) -> Result<Decimal> {
        let rows = sqlx::query(
            "SELECT realized_pnl FROM trades WHERE close_day_ist = ?1 AND realized_pnl IS NOT NULL",
        )
        .bind(date_ist)
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for row in rows {
            let raw: String = row.get("realized_pnl");
            total += Decimal::from_str(&raw)?;
        }
        Ok(total)
    }

    /// Durable note for an operational event the engine wants on record
    /// (e.g. an abandoned entry after a fill timeout).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn write_note(&self, at: DateTime<Utc>, kind: &str, detail: &str) -> Result<()> {
        sqlx::query("INSERT INTO order_notes (at, kind, detail) VALUES (?1, ?2, ?3)")
            .bind(at)
            .bind(kind)
            .bind(detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRow> {
    let opt_decimal = |col: &str| -> Result<Option<Decimal>> {
        let raw: Option<String> = row.get(col);
        raw.map(|s| Decimal::from_str(&s).map_err(Into::into))
            .transpose()
    };

    Ok(TradeRow {
        trade_id: row.get("trade_id"),
        open_at: row.get("open_at"),
        close_at: row.get("close_at"),
        side: row.get("side"),
        strike: Decimal::from_str(&row.get::<String, _>("strike"))?,
        expiry: row.get("expiry"),
        entry_price: Decimal::from_str(&row.get::<String, _>("entry_price"))?,
        exit_price: opt_decimal("exit_price")?,
        qty: u32::try_from(row.get::<i64, _>("qty"))?,
        realized_pnl: opt_decimal("realized_pnl")?,
        exit_reason: row.get("exit_reason"),
        mode: row.get("mode"),
        root: row.get("root"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TradeDatabase;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use trend_trade_core::{IndexKind, OptionSide, TradeMode};

    fn sample_open(trade_id: &str) -> TradeOpen {
        TradeOpen {
            trade_id: trade_id.to_string(),
            open_at: Utc.with_ymd_and_hms(2026, 8, 5, 4, 30, 0).unwrap(),
            side: OptionSide::Call,
            strike: dec!(23500),
            expiry: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            entry_price: dec!(100.05),
            qty: 50,
            mode: TradeMode::Paper,
            root: IndexKind::Nifty,
        }
    }

    #[tokio::test]
    async fn open_then_close_round_trips() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool().clone());

        repo.write_open(&sample_open("t-1")).await.unwrap();
        let open = repo.get("t-1").await.unwrap().unwrap();
        assert!(!open.is_closed());
        assert_eq!(open.entry_price, dec!(100.05));
        assert_eq!(open.qty, 50);

        let close_at = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        let applied = repo
            .write_close("t-1", close_at, day, dec!(109), dec!(450), "Reversal")
            .await
            .unwrap();
        assert!(applied);

        let closed = repo.get("t-1").await.unwrap().unwrap();
        assert!(closed.is_closed());
        assert_eq!(closed.exit_price, Some(dec!(109)));
        assert_eq!(closed.realized_pnl, Some(dec!(450)));
        assert_eq!(closed.exit_reason.as_deref(), Some("Reversal"));
    }

    #[tokio::test]
    async fn write_close_is_idempotent_by_trade_id() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool().clone());
        repo.write_open(&sample_open("t-2")).await.unwrap();

        let close_at = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        assert!(repo
            .write_close("t-2", close_at, day, dec!(95), dec!(-250), "Initial SL")
            .await
            .unwrap());

        // Replay with different values must not touch the row.
        assert!(!repo
            .write_close("t-2", close_at, day, dec!(200), dec!(5000), "Target")
            .await
            .unwrap());

        let row = repo.get("t-2").await.unwrap().unwrap();
        assert_eq!(row.exit_price, Some(dec!(95)));
        assert_eq!(row.exit_reason.as_deref(), Some("Initial SL"));
    }

    #[tokio::test]
    async fn write_open_replay_is_a_no_op() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool().clone());
        repo.write_open(&sample_open("t-3")).await.unwrap();

        let mut replay = sample_open("t-3");
        replay.entry_price = dec!(999);
        repo.write_open(&replay).await.unwrap();

        let row = repo.get("t-3").await.unwrap().unwrap();
        assert_eq!(row.entry_price, dec!(100.05));
    }

    #[tokio::test]
    async fn day_pnl_sums_only_that_ist_date() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool().clone());

        let day = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        let other = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();

        for (id, d, pnl) in [("a", day, dec!(450)), ("b", day, dec!(-300)), ("c", other, dec!(100))] {
            repo.write_open(&sample_open(id)).await.unwrap();
            repo.write_close(id, at, d, dec!(100), pnl, "Target").await.unwrap();
        }

        assert_eq!(repo.realized_pnl_for_day(day).await.unwrap(), dec!(150));
        assert_eq!(repo.realized_pnl_for_day(other).await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = TradeRepository::new(db.pool().clone());

        let mut first = sample_open("old");
        first.open_at = Utc.with_ymd_and_hms(2026, 8, 5, 4, 0, 0).unwrap();
        let mut second = sample_open("new");
        second.open_at = Utc.with_ymd_and_hms(2026, 8, 5, 5, 0, 0).unwrap();
        repo.write_open(&first).await.unwrap();
        repo.write_open(&second).await.unwrap();

        let rows = repo.recent(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trade_id, "new");
    }
}
