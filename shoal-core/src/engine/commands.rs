//! Command definitions for the swarm engine actor.

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use super::EngineError;
use crate::stats::StatsSnapshot;
use crate::swarm::{LeaseSnapshot, SourceId, SourceNotification, SwarmSource};

/// Commands that can be sent to the swarm engine actor.
///
/// Each command carries a response channel the actor answers on.
pub enum SwarmEngineCommand {
    /// Start downloading from a new source.
    AddSource {
        source: SwarmSource,
        responder: oneshot::Sender<Result<SourceId, EngineError>>,
    },
    /// Stop a source and forget it.
    RemoveSource {
        id: SourceId,
        responder: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Get counters and lease state.
    GetStats {
        responder: oneshot::Sender<EngineStats>,
    },
    /// Receive source events from now on.
    Subscribe {
        responder: oneshot::Sender<broadcast::Receiver<SourceNotification>>,
    },
    /// Stop every source, release outstanding leases and exit.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub active_sources: usize,
    pub complete: bool,
    pub counters: StatsSnapshot,
    pub leases: LeaseSnapshot,
}
