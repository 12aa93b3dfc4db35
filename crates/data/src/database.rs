use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// `SQLite` connection pool for the trade journal and config store.
///
/// Uses connection pooling for concurrent access; migrations run on open.
#[derive(Clone)]
pub struct TradeDatabase {
    pool: SqlitePool,
}

impl TradeDatabase {
    /// Creates a new database connection pool and runs migrations.
    ///
    /// # Arguments
    ///
    /// * `database_url` - `SQLite` path (e.g. `sqlite://trend_trade.db?mode=rwc`)
    ///
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
