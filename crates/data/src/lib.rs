pub mod database;
pub mod models;
pub mod repositories;

pub use database::TradeDatabase;
pub use models::{DayStatsRow, TradeOpen, TradeRow};
pub use repositories::config_repo::ConfigRepository;
pub use repositories::day_stats_repo::DayStatsRepository;
pub use repositories::trade_repo::TradeRepository;
