use tokio::sync::{broadcast, oneshot};
use trend_trade_core::{ConfigError, ConfigPatch, EngineEvent, Snapshot};

/// How `Stop` treats an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Refuse to stop while a position is not closed.
    Graceful,
    /// Submit an immediate SELL, then stop.
    ForceFlat,
}

/// Acknowledgement for `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAck {
    Running,
    AlreadyRunning,
}

#[derive(Debug)]
pub enum EngineCommand {
    Start(oneshot::Sender<StartAck>),
    Stop {
        mode: StopMode,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Manual exit through the same single-SELL path as every other exit.
    Squareoff(oneshot::Sender<Result<(), String>>),
    UpdateConfig {
        patch: ConfigPatch,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    GetSnapshot(oneshot::Sender<Snapshot>),
    Subscribe(oneshot::Sender<broadcast::Receiver<EngineEvent>>),
    Shutdown,
}
