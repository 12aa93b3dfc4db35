use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use trend_trade_core::{ConfigPatch, EngineEvent, Snapshot};

use crate::commands::{EngineCommand, StartAck, StopMode};

/// Cloneable control surface for one engine instance.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    status_rx: watch::Receiver<Snapshot>,
}

impl EngineHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<EngineCommand>, status_rx: watch::Receiver<Snapshot>) -> Self {
        Self { tx, status_rx }
    }

    /// Starts the trading loop.
    ///
    /// # Errors
    /// Returns an error if the engine task is gone.
    pub async fn start(&self) -> Result<StartAck> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Start(reply)).await?;
        Ok(rx.await?)
    }

    /// Stops the trading loop. `Graceful` refuses while a position is not
    /// closed; `ForceFlat` squares off first.
    ///
    /// # Errors
    /// Returns an error if the engine refuses or the task is gone.
    pub async fn stop(&self, mode: StopMode) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Stop { mode, reply }).await?;
        rx.await?.map_err(|e| anyhow!(e))
    }

    /// Manually squares off the open position.
    ///
    /// # Errors
    /// Returns an error if there is no position or the task is gone.
    pub async fn squareoff(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Squareoff(reply)).await?;
        rx.await?.map_err(|e| anyhow!(e))
    }

    /// Applies a config patch under the runtime-safety rules.
    ///
    /// # Errors
    /// Returns an error if the patch is rejected or the task is gone.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::UpdateConfig { patch, reply })
            .await?;
        rx.await??;
        Ok(())
    }

    /// Requests a fresh snapshot from the loop.
    ///
    /// # Errors
    /// Returns an error if the engine task is gone.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::GetSnapshot(reply)).await?;
        Ok(rx.await?)
    }

    /// The most recently published snapshot, without a round trip.
    #[must_use]
    pub fn latest_snapshot(&self) -> Snapshot {
        self.status_rx.borrow().clone()
    }

    /// A stream of snapshot values: await `changed()` and `borrow()` the
    /// latest. Each observer holds its own receiver.
    #[must_use]
    pub fn snapshot_stream(&self) -> watch::Receiver<Snapshot> {
        self.status_rx.clone()
    }

    /// Subscribes to the event stream. Slow subscribers lag and drop.
    ///
    /// # Errors
    /// Returns an error if the engine task is gone.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<EngineEvent>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Subscribe(reply)).await?;
        Ok(rx.await?)
    }

    /// Shuts down the engine task.
    ///
    /// # Errors
    /// Returns an error if the engine task is gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(EngineCommand::Shutdown).await?;
        Ok(())
    }
}
