//! Handle for communicating with the swarm engine actor.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::EngineError;
use super::commands::{EngineStats, SwarmEngineCommand};
use crate::swarm::{SourceId, SourceNotification, SwarmSource};

/// Cloneable async API over the engine actor.
#[derive(Clone)]
pub struct SwarmEngineHandle {
    sender: mpsc::Sender<SwarmEngineCommand>,
}

impl SwarmEngineHandle {
    pub fn new(sender: mpsc::Sender<SwarmEngineCommand>) -> Self {
        Self { sender }
    }

    /// Adds a source and starts downloading from it.
    ///
    /// # Errors
    /// - `EngineError::DuplicateSource` - Source already added
    /// - `EngineError::EngineShutdown` - Engine no longer running
    pub async fn add_source(&self, source: SwarmSource) -> Result<SourceId, EngineError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmEngineCommand::AddSource { source, responder })
            .await?;
        rx.await.map_err(|_| EngineError::EngineShutdown)?
    }

    /// Stops a source, releasing whatever it had leased.
    ///
    /// # Errors
    /// - `EngineError::SourceNotFound` - Unknown or already dropped source
    /// - `EngineError::EngineShutdown` - Engine no longer running
    pub async fn remove_source(&self, id: SourceId) -> Result<(), EngineError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmEngineCommand::RemoveSource { id, responder })
            .await?;
        rx.await.map_err(|_| EngineError::EngineShutdown)?
    }

    /// Gets engine statistics.
    ///
    /// # Errors
    /// - `EngineError::EngineShutdown` - Engine no longer running
    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmEngineCommand::GetStats { responder }).await?;
        rx.await.map_err(|_| EngineError::EngineShutdown)
    }

    /// Subscribes to source lifecycle events.
    ///
    /// # Errors
    /// - `EngineError::EngineShutdown` - Engine no longer running
    pub async fn subscribe(
        &self,
    ) -> Result<broadcast::Receiver<SourceNotification>, EngineError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmEngineCommand::Subscribe { responder })
            .await?;
        rx.await.map_err(|_| EngineError::EngineShutdown)
    }

    /// Stops every source and waits until outstanding leases are released.
    ///
    /// # Errors
    /// - `EngineError::EngineShutdown` - Engine already stopped
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (responder, rx) = oneshot::channel();
        self.send(SwarmEngineCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| EngineError::EngineShutdown)
    }

    async fn send(&self, command: SwarmEngineCommand) -> Result<(), EngineError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| EngineError::EngineShutdown)
    }
}
