//! Shoal Simulation Framework - Deterministic testing for swarm downloads.
//!
//! Replaces the HTTP transport with an in-process [`SimulatedConnector`]
//! whose sources follow scripted [`SourceBehavior`]s: honest, short,
//! lying, truncating, refusing, and so on. Body chunking and latency are
//! driven by a seeded RNG, so the same seed reproduces the same run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use shoal_sim::{SourceBehavior, SwarmScenario};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = SwarmScenario::new(42)
//!     .with_file("movie.mkv", 1_000_000)
//!     .with_source(SourceBehavior::Honest)
//!     .with_source(SourceBehavior::ShortResponse { max_bytes: 1000 })
//!     .with_source(SourceBehavior::Refusing)
//!     .run(Duration::from_secs(30))
//!     .await?;
//!
//! assert!(report.complete && report.content_matches);
//! # Ok(())
//! # }
//! ```

pub mod behavior;
pub mod connector;
pub mod network;
pub mod scenario;

pub use behavior::SourceBehavior;
pub use connector::{RecordedRequest, SimulatedConnector};
pub use network::{NetworkSimulator, NetworkSimulatorBuilder};
pub use scenario::{ScenarioError, ScenarioReport, ScenarioSource, SwarmScenario, generate_content};
