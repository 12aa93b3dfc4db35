//! Engine instance registry: spawn, look up, and shut down per-strategy
//! engine actors.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

use trend_trade_core::{BrokerAdapter, EngineConfig, Snapshot};
use trend_trade_data::TradeDatabase;

use crate::actor::EngineActor;
use crate::handle::EngineHandle;

pub struct EngineRegistry {
    engines: Arc<RwLock<HashMap<String, EngineHandle>>>,
    database: TradeDatabase,
}

impl EngineRegistry {
    #[must_use]
    pub fn new(database: TradeDatabase) -> Self {
        Self {
            engines: Arc::new(RwLock::new(HashMap::new())),
            database,
        }
    }

    /// Spawns an engine actor for a strategy instance. The instance id must
    /// be unique; use [`EngineRegistry::get`] to reach an existing one.
    ///
    /// # Errors
    /// Returns an error if the instance id is already registered or the
    /// config is invalid.
    pub async fn spawn(
        &self,
        instance_id: &str,
        config: EngineConfig,
        broker: Arc<dyn BrokerAdapter>,
    ) -> Result<EngineHandle> {
        config.validate()?;

        let mut engines = self.engines.write().await;
        if engines.contains_key(instance_id) {
            bail!("engine instance {instance_id} already registered");
        }

        let (tx, rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(Snapshot::idle(
            instance_id.to_string(),
            config.mode,
            config.root,
        ));
        let (event_tx, _) = broadcast::channel(EngineActor::event_capacity());

        let actor = EngineActor::new(
            instance_id.to_string(),
            config,
            broker,
            &self.database,
            rx,
            status_tx,
            event_tx,
        );

        let id_for_task = instance_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                tracing::error!(instance = %id_for_task, error = %e, "engine actor failed");
            }
        });

        let handle = EngineHandle::new(tx, status_rx);
        engines.insert(instance_id.to_string(), handle.clone());
        tracing::info!(instance = %instance_id, "engine registered");

        Ok(handle)
    }

    /// Handle for an existing instance.
    #[must_use]
    pub async fn get(&self, instance_id: &str) -> Option<EngineHandle> {
        self.engines.read().await.get(instance_id).cloned()
    }

    /// All registered instance ids.
    #[must_use]
    pub async fn list(&self) -> Vec<String> {
        self.engines.read().await.keys().cloned().collect()
    }

    /// Removes and shuts down one instance.
    ///
    /// # Errors
    /// Returns an error if the shutdown command cannot be delivered.
    pub async fn remove(&self, instance_id: &str) -> Result<()> {
        let handle = self.engines.write().await.remove(instance_id);
        if let Some(handle) = handle {
            handle.shutdown().await?;
            tracing::info!(instance = %instance_id, "engine removed");
        }
        Ok(())
    }

    /// Shuts down every registered instance.
    ///
    /// # Errors
    /// Returns an error if any shutdown command cannot be delivered.
    pub async fn shutdown_all(&self) -> Result<()> {
        let handles: Vec<_> = self.engines.read().await.values().cloned().collect();
        for handle in handles {
            handle.shutdown().await?;
        }
        Ok(())
    }
}
