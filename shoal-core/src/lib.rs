//! Shoal Core - Multi-source swarm downloading
//!
//! This crate splits one download across many HTTP sources at once:
//! byte-range bookkeeping, lease coordination, response validation,
//! storage, and the actor-based engine that drives every source.

pub mod config;
pub mod engine;
pub mod network;
pub mod range;
pub mod stats;
pub mod storage;
pub mod swarm;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::ShoalConfig;
pub use engine::{EngineError, SwarmEngineHandle, spawn_swarm_engine};
pub use network::ConnectionError;
pub use range::{IntervalSet, Range, RangeError};
pub use storage::StorageError;
pub use swarm::{ContentError, SwarmCoordinator, SwarmError, VerifierError};

/// Core errors that can bubble up from any Shoal subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    #[error("Verification error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShoalError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ShoalError::Swarm(e) => match e {
                SwarmError::InvalidLayout { reason } => format!("Invalid file layout: {reason}"),
                SwarmError::InvalidSource { url, reason } => {
                    format!("Invalid source {url}: {reason}")
                }
                _ => "Download error occurred".to_string(),
            },
            ShoalError::Content(_) => "A source sent invalid content".to_string(),
            ShoalError::Connection(e) => format!("Network error: {e}"),
            ShoalError::Storage(_) => "Storage error occurred".to_string(),
            ShoalError::Engine(_) => "Download engine stopped unexpectedly".to_string(),
            ShoalError::Range(e) => format!("Invalid byte range: {e}"),
            ShoalError::Verifier(e) => format!("Invalid block hashes: {e}"),
            ShoalError::Configuration { reason } => format!("Configuration error: {reason}"),
            ShoalError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ShoalError::Configuration { .. }
                | ShoalError::Range(_)
                | ShoalError::Verifier(_)
                | ShoalError::Swarm(
                    SwarmError::InvalidLayout { .. } | SwarmError::InvalidSource { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, ShoalError>;
