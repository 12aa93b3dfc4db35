//! Per-day statistics repository.

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::DayStatsRow;

#[derive(Debug, Clone)]
pub struct DayStatsRepository {
    pool: SqlitePool,
}

impl DayStatsRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upserts the aggregate row for an IST date.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn upsert(&self, stats: &DayStatsRow) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO day_stats (date_ist, realized_pnl, trades_taken, daily_loss_tripped)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(date_ist) DO UPDATE SET
                realized_pnl = excluded.realized_pnl,
                trades_taken = excluded.trades_taken,
                daily_loss_tripped = excluded.daily_loss_tripped
            ",
        )
        .bind(stats.date_ist)
        .bind(stats.realized_pnl.to_string())
        .bind(i64::from(stats.trades_taken))
        .bind(i64::from(stats.daily_loss_tripped))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets the row for an IST date.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn get(&self, date_ist: NaiveDate) -> Result<Option<DayStatsRow>> {
        let row = sqlx::query(
            "SELECT date_ist, realized_pnl, trades_taken, daily_loss_tripped
             FROM day_stats WHERE date_ist = ?1",
        )
        .bind(date_ist)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(DayStatsRow {
                date_ist: r.get("date_ist"),
                realized_pnl: Decimal::from_str(&r.get::<String, _>("realized_pnl"))?,
                trades_taken: u32::try_from(r.get::<i64, _>("trades_taken"))?,
                daily_loss_tripped: r.get::<i64, _>("daily_loss_tripped") != 0,
            })
        })
        .transpose()
    }
}
