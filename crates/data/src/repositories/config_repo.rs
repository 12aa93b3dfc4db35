//! Key/value config store.
//!
//! Rows are serialized JSON values so callers round-trip typed settings
//! without a schema change per knob.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
}

impl ConfigRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Sets one key. Last write wins.
    ///
    /// # Errors
    /// Returns an error if serialization or the database operation fails.
    pub async fn set<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        sqlx::query(
            r"
            INSERT INTO config (key, value_json) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json
            ",
        )
        .bind(key)
        .bind(value_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Gets one key, deserialized.
    ///
    /// # Errors
    /// Returns an error if the database query or deserialization fails.
    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value_json FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let raw: String = r.get("value_json");
            serde_json::from_str(&raw).map_err(Into::into)
        })
        .transpose()
    }

    /// All keys with their raw JSON values.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn all(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value_json FROM config")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value_json")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TradeDatabase;
    use trend_trade_core::EngineConfig;

    #[tokio::test]
    async fn typed_round_trip_and_overwrite() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = ConfigRepository::new(db.pool().clone());

        let mut cfg = EngineConfig::default();
        repo.set("engine", &cfg).await.unwrap();

        cfg.max_trades_per_day = 3;
        repo.set("engine", &cfg).await.unwrap();

        let loaded: EngineConfig = repo.get("engine").await.unwrap().unwrap();
        assert_eq!(loaded.max_trades_per_day, 3);
        assert_eq!(repo.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let db = TradeDatabase::new_in_memory().await.unwrap();
        let repo = ConfigRepository::new(db.pool().clone());
        let loaded: Option<EngineConfig> = repo.get("nope").await.unwrap();
        assert!(loaded.is_none());
    }
}
