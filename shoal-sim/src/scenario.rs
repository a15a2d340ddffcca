//! End-to-end swarm scenarios over simulated sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shoal_core::config::ShoalConfig;
use shoal_core::engine::{EngineError, EngineStats, spawn_swarm_engine};
use shoal_core::range::IntervalSet;
use shoal_core::stats::SwarmStats;
use shoal_core::storage::{MemoryStorage, SwarmStorage};
use shoal_core::swarm::{
    Sha1BlockVerifier, SwarmCoordinator, SwarmError, SwarmFileSystem, SwarmSource, VerifierError,
};

use crate::behavior::SourceBehavior;
use crate::connector::SimulatedConnector;
use crate::network::NetworkSimulator;

/// Errors setting up a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Invalid scenario layout: {0}")]
    Layout(#[from] SwarmError),

    #[error("Invalid block verification: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Engine failed: {0}")]
    Engine(#[from] EngineError),
}

/// One source taking part in a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioSource {
    pub behavior: SourceBehavior,
    pub supports_ranges: bool,
    /// Aggregate bytes the source claims, `None` for everything
    pub available: Option<IntervalSet>,
}

impl ScenarioSource {
    pub fn new(behavior: SourceBehavior) -> Self {
        Self {
            behavior,
            supports_ranges: true,
            available: None,
        }
    }

    pub fn without_range_support(mut self) -> Self {
        self.supports_ranges = false;
        self
    }

    pub fn with_available(mut self, available: IntervalSet) -> Self {
        self.available = Some(available);
        self
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Every byte was verified before the time limit
    pub complete: bool,
    /// Stored files equal the generated content
    pub content_matches: bool,
    pub stats: EngineStats,
    pub requests: usize,
    pub connections: u64,
    pub elapsed: Duration,
}

/// Builds and runs a download of generated content from simulated sources.
///
/// Sources are named `mirror-0`, `mirror-1`, ... in the order they were
/// added and serve every file under their root URL.
pub struct SwarmScenario {
    seed: u64,
    files: Vec<(String, u64)>,
    sources: Vec<ScenarioSource>,
    config: ShoalConfig,
    network: NetworkSimulator,
    verification_block: Option<u64>,
}

impl SwarmScenario {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            files: Vec::new(),
            sources: Vec::new(),
            config: ShoalConfig::for_testing(),
            network: NetworkSimulator::new(),
            verification_block: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, length: u64) -> Self {
        self.files.push((path.into(), length));
        self
    }

    pub fn with_source(self, behavior: SourceBehavior) -> Self {
        self.with_scenario_source(ScenarioSource::new(behavior))
    }

    pub fn with_scenario_source(mut self, source: ScenarioSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_config(mut self, config: ShoalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_network(mut self, network: NetworkSimulator) -> Self {
        self.network = network;
        self
    }

    /// Verifies downloaded blocks against SHA-1 digests of the generated content.
    pub fn with_block_verification(mut self, block_size: u64) -> Self {
        self.verification_block = Some(block_size);
        self
    }

    /// Content generated for file number `index`.
    pub fn content_for(&self, index: usize) -> Vec<u8> {
        let length = self.files.get(index).map_or(0, |(_, length)| *length);
        generate_content(self.seed.wrapping_add(index as u64), length)
    }

    /// Runs the download until it completes, every source is gone, or `limit` passes.
    ///
    /// # Errors
    ///
    /// - `ScenarioError::Layout` - Files or source URLs are invalid
    /// - `ScenarioError::Verifier` - Block verification could not be set up
    /// - `ScenarioError::Engine` - The engine stopped unexpectedly
    pub async fn run(self, limit: Duration) -> Result<ScenarioReport, ScenarioError> {
        let started = Instant::now();
        let contents: Vec<Vec<u8>> = (0..self.files.len()).map(|i| self.content_for(i)).collect();
        let files = SwarmFileSystem::new(self.files.iter().cloned())?;

        let coordinator = match self.verification_block {
            Some(block_size) => {
                let aggregate: Vec<u8> = contents.concat();
                let verifier = Sha1BlockVerifier::from_content(block_size, &aggregate)?;
                SwarmCoordinator::with_verifier(files, &self.config.swarm, Arc::new(verifier))
            }
            None => SwarmCoordinator::new(files, &self.config.swarm),
        };
        let coordinator = Arc::new(coordinator);

        let mut connector = SimulatedConnector::new(self.seed).with_network(self.network.clone());
        for ((path, _), content) in self.files.iter().zip(&contents) {
            connector = connector.with_file(format!("/{path}"), content.clone());
        }
        for (index, source) in self.sources.iter().enumerate() {
            connector = connector.with_behavior(format!("mirror-{index}"), source.behavior);
        }
        let connector = Arc::new(connector);

        let storage = Arc::new(MemoryStorage::new());
        let stats = Arc::new(SwarmStats::new(self.config.network.bandwidth_window));
        let handle = spawn_swarm_engine(
            self.config.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&storage) as Arc<dyn SwarmStorage>,
            Arc::clone(&connector) as Arc<dyn shoal_core::network::SourceConnector>,
            stats,
        );

        for (index, scenario_source) in self.sources.iter().enumerate() {
            let mut source = SwarmSource::parse(&format!("http://mirror-{index}/"))?;
            if !scenario_source.supports_ranges {
                source = source.without_range_support();
            }
            if let Some(available) = &scenario_source.available {
                source = source.with_available(available.clone());
            }
            handle.add_source(source).await?;
        }

        let mut stats = handle.stats().await?;
        while !stats.complete && stats.active_sources > 0 && started.elapsed() < limit {
            tokio::time::sleep(Duration::from_millis(5)).await;
            stats = handle.stats().await?;
        }
        handle.shutdown().await?;

        let content_matches = self
            .files
            .iter()
            .zip(&contents)
            .all(|((path, _), content)| storage.contents(path).as_ref() == Some(content));
        tracing::debug!(
            "Scenario seed {} finished: complete={} matches={}",
            self.seed,
            stats.complete,
            content_matches
        );

        Ok(ScenarioReport {
            complete: stats.complete,
            content_matches,
            stats,
            requests: connector.requests().len(),
            connections: connector.connection_count(),
            elapsed: started.elapsed(),
        })
    }
}

/// Deterministic pseudo-random file content.
pub fn generate_content(seed: u64, length: u64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut content = vec![0u8; length as usize];
    rng.fill_bytes(&mut content);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_content_is_deterministic() {
        assert_eq!(generate_content(9, 64), generate_content(9, 64));
        assert_ne!(generate_content(9, 64), generate_content(10, 64));
        assert!(generate_content(1, 0).is_empty());
    }

    #[tokio::test]
    async fn test_single_honest_source() {
        let report = SwarmScenario::new(1)
            .with_file("a.bin", 20_000)
            .with_source(SourceBehavior::Honest)
            .run(Duration::from_secs(10))
            .await
            .unwrap();

        assert!(report.complete);
        assert!(report.content_matches);
        assert_eq!(report.stats.leases.verified, 20_000);
    }

    #[tokio::test]
    async fn test_invalid_layout_rejected() {
        let result = SwarmScenario::new(1)
            .with_file("a.bin", 0)
            .run(Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(ScenarioError::Layout(_))));
    }
}
