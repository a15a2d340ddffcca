//! Actor-based swarm engine.
//!
//! The engine owns every source downloader. Callers talk to it through a
//! cloneable [`SwarmEngineHandle`]; the actor applies a
//! [`SourcePolicy`](crate::swarm::SourcePolicy) to each finished
//! connection attempt to decide whether the source gets another one.

mod actor;
mod commands;
mod handle;

pub use actor::{spawn_swarm_engine, spawn_swarm_engine_with_policy};
pub use commands::{EngineStats, SwarmEngineCommand};
pub use handle::SwarmEngineHandle;

use crate::swarm::SourceId;

/// Errors from the engine actor.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Swarm engine has shut down")]
    EngineShutdown,

    #[error("Source {id} already added")]
    DuplicateSource { id: SourceId },

    #[error("Source {id} not found")]
    SourceNotFound { id: SourceId },
}
