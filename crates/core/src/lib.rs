pub mod broker;
pub mod candles;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod indicators;
pub mod position;
pub mod session;
pub mod types;

pub use broker::{BrokerAdapter, BrokerError, MarketOrder, OrderAction, OrderState, OrderUpdate};
pub use candles::CandleAggregator;
pub use config::{
    AppConfig, ConfigError, ConfigPatch, DatabaseConfig, DhanConfig, EngineConfig, MacdParams,
    TradeMode,
};
pub use config_loader::ConfigLoader;
pub use events::{Candle, EngineEvent, IndicatorSnapshot, LastAction, PositionSnapshot, RiskBookSnapshot, Snapshot};
pub use indicators::{Macd, SuperTrend, TrendDirection};
pub use position::{ExitReason, Position, PositionState, RiskAnchors, RiskBook};
pub use types::{IndexKind, OptionContract, OptionSide, Tick};
