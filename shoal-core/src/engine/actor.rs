//! Actor implementation for the swarm engine.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::EngineError;
use super::commands::{EngineStats, SwarmEngineCommand};
use super::handle::SwarmEngineHandle;
use crate::config::ShoalConfig;
use crate::network::SourceConnector;
use crate::stats::SwarmStats;
use crate::storage::SwarmStorage;
use crate::swarm::{
    DownloaderState, PolicyAction, ReconnectingPolicy, SourceContext, SourceDownloader, SourceId,
    SourceNotification, SourcePolicy, SwarmCoordinator, SwarmSource,
};

/// Spawns the swarm engine actor with the default reconnecting policy.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
///
/// use shoal_core::config::ShoalConfig;
/// use shoal_core::engine::spawn_swarm_engine;
/// use shoal_core::network::HttpConnector;
/// use shoal_core::stats::SwarmStats;
/// use shoal_core::storage::MemoryStorage;
/// use shoal_core::swarm::{SwarmCoordinator, SwarmFileSystem, SwarmSource};
///
/// let config = ShoalConfig::default();
/// let files = SwarmFileSystem::single("movie.mkv", 1_048_576).unwrap();
/// let coordinator = Arc::new(SwarmCoordinator::new(files, &config.swarm));
/// let stats = Arc::new(SwarmStats::new(config.network.bandwidth_window));
/// let connector = Arc::new(HttpConnector::new(&config.network, stats.bandwidth()).unwrap());
///
/// let handle = spawn_swarm_engine(
///     config,
///     coordinator,
///     Arc::new(MemoryStorage::new()),
///     connector,
///     stats,
/// );
/// let source = SwarmSource::parse("http://127.0.0.1:8080/movie.mkv").unwrap();
/// handle.add_source(source).await.unwrap();
/// # }
/// ```
pub fn spawn_swarm_engine(
    config: ShoalConfig,
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    connector: Arc<dyn SourceConnector>,
    stats: Arc<SwarmStats>,
) -> SwarmEngineHandle {
    let policy = Box::new(ReconnectingPolicy::new(config.swarm.max_reconnects));
    spawn_swarm_engine_with_policy(config, coordinator, storage, connector, stats, policy)
}

/// Spawns the swarm engine actor with a custom source policy.
pub fn spawn_swarm_engine_with_policy(
    config: ShoalConfig,
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    connector: Arc<dyn SourceConnector>,
    stats: Arc<SwarmStats>,
    policy: Box<dyn SourcePolicy>,
) -> SwarmEngineHandle {
    let (sender, receiver) = mpsc::channel(100);
    let (notification_sender, notification_receiver) = mpsc::unbounded_channel();
    let (subscribers, _) = broadcast::channel(config.swarm.event_capacity.max(1));

    let engine = SwarmEngine {
        config,
        coordinator,
        storage,
        connector,
        stats,
        policy,
        sources: HashMap::new(),
        notifications: notification_sender,
        subscribers,
    };

    tokio::spawn(async move {
        run_actor_loop(engine, receiver, notification_receiver).await;
    });

    SwarmEngineHandle::new(sender)
}

struct SourceEntry {
    context: SourceContext,
    stop: watch::Sender<bool>,
    task: JoinHandle<DownloaderState>,
}

struct SwarmEngine {
    config: ShoalConfig,
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    connector: Arc<dyn SourceConnector>,
    stats: Arc<SwarmStats>,
    policy: Box<dyn SourcePolicy>,
    sources: HashMap<SourceId, SourceEntry>,
    notifications: mpsc::UnboundedSender<SourceNotification>,
    subscribers: broadcast::Sender<SourceNotification>,
}

impl SwarmEngine {
    fn spawn_downloader(
        &self,
        source: Arc<SwarmSource>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<DownloaderState> {
        let downloader = SourceDownloader::new(
            source,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.storage),
            Arc::clone(&self.connector),
            Arc::clone(&self.stats),
            self.notifications.clone(),
            stop,
            &self.config,
        );
        tokio::spawn(downloader.run())
    }

    fn add_source(&mut self, source: SwarmSource) -> Result<SourceId, EngineError> {
        let id = source.id();
        if self.sources.contains_key(&id) {
            return Err(EngineError::DuplicateSource { id });
        }

        let source = Arc::new(source);
        let (stop, stop_receiver) = watch::channel(false);
        let task = self.spawn_downloader(Arc::clone(&source), stop_receiver);

        tracing::info!("Added source {}", source);
        self.stats.source_added();
        self.sources.insert(
            id,
            SourceEntry {
                context: SourceContext::new(source),
                stop,
                task,
            },
        );
        Ok(id)
    }

    async fn remove_source(&mut self, id: SourceId) -> Result<(), EngineError> {
        let entry = self
            .sources
            .remove(&id)
            .ok_or(EngineError::SourceNotFound { id })?;

        let _ = entry.stop.send(true);
        if let Err(e) = entry.task.await {
            tracing::warn!("Downloader for {} panicked: {}", id, e);
        }
        tracing::info!("Removed source {}", id);
        Ok(())
    }

    fn handle_notification(&mut self, notification: SourceNotification) {
        // No subscribers is fine
        let _ = self.subscribers.send(notification.clone());

        let SourceNotification { source: id, event } = notification;
        let Some(entry) = self.sources.get_mut(&id) else {
            return;
        };

        entry.context.record(&event);
        match self.policy.on_event(&entry.context, &event) {
            PolicyAction::Continue => {}
            PolicyAction::Readd => {
                entry.context.reconnects += 1;
                tracing::debug!(
                    "Re-adding source {} (reconnect {})",
                    id,
                    entry.context.reconnects
                );
                let source = Arc::clone(&entry.context.source);
                let stop = entry.stop.subscribe();
                let task = self.spawn_downloader(source, stop);
                if let Some(entry) = self.sources.get_mut(&id) {
                    entry.task = task;
                }
            }
            PolicyAction::Drop => {
                tracing::info!("Dropping source {} after {:?}", id, event);
                self.sources.remove(&id);
            }
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            active_sources: self.sources.len(),
            complete: self.coordinator.is_complete(),
            counters: self.stats.snapshot(),
            leases: self.coordinator.snapshot(),
        }
    }

    async fn shutdown(&mut self) {
        let entries: Vec<SourceEntry> = self.sources.drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            let _ = entry.stop.send(true);
        }

        let results = join_all(entries.into_iter().map(|entry| entry.task)).await;
        let panicked = results.iter().filter(|result| result.is_err()).count();
        if panicked > 0 {
            tracing::warn!("{} downloader(s) panicked during shutdown", panicked);
        }

        let released = self.coordinator.release_all_leases();
        tracing::info!(
            "Swarm engine shut down, {} leased bytes released",
            released
        );
    }
}

/// Processes commands and source notifications until shutdown.
async fn run_actor_loop(
    mut engine: SwarmEngine,
    mut receiver: mpsc::Receiver<SwarmEngineCommand>,
    mut notifications: mpsc::UnboundedReceiver<SourceNotification>,
) {
    tracing::debug!("Swarm engine actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    // Every handle dropped
                    engine.shutdown().await;
                    break;
                };
                if !handle_command(&mut engine, command).await {
                    break;
                }
            }
            Some(notification) = notifications.recv() => {
                engine.handle_notification(notification);
            }
        }
    }

    tracing::debug!("Swarm engine actor stopped");
}

/// Handles a single command. Returns false to shut down.
async fn handle_command(engine: &mut SwarmEngine, command: SwarmEngineCommand) -> bool {
    match command {
        SwarmEngineCommand::AddSource { source, responder } => {
            let result = engine.add_source(source);
            let _ = responder.send(result);
        }

        SwarmEngineCommand::RemoveSource { id, responder } => {
            let result = engine.remove_source(id).await;
            let _ = responder.send(result);
        }

        SwarmEngineCommand::GetStats { responder } => {
            let _ = responder.send(engine.stats());
        }

        SwarmEngineCommand::Subscribe { responder } => {
            let _ = responder.send(engine.subscribers.subscribe());
        }

        SwarmEngineCommand::Shutdown { responder } => {
            engine.shutdown().await;
            let _ = responder.send(());
            return false;
        }
    }

    true
}
