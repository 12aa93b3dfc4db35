//! Dhan broker integration: the live HTTP adapter and the paper-trading
//! simulator. Both implement `trend_trade_core::BrokerAdapter`; the engine
//! cannot tell them apart.

pub mod adapter;
pub mod client;
pub mod paper;
pub mod types;

pub use adapter::DhanBroker;
pub use client::DhanClient;
pub use paper::PaperBroker;
