//! Per-source download driver.
//!
//! A [`SourceDownloader`] owns one connection attempt to one source. It
//! repeatedly leases bytes the source can serve, issues a range request,
//! validates the response and streams the body to storage, until the
//! source has nothing left to offer, the download completes, something
//! fails, or the engine asks it to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{
    ContentError, ContentListener, SourceEvent, SourceNotification, SourceStatus,
    SwarmCoordinator, SwarmError, SwarmSource,
};
use crate::config::ShoalConfig;
use crate::network::{ConnectionError, RangeRequest, SourceConnection, SourceConnector};
use crate::range::Range;
use crate::stats::SwarmStats;
use crate::storage::SwarmStorage;

/// Where a downloader is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderState {
    Idle,
    Connecting,
    AwaitingRequestSlot,
    Requesting,
    AwaitingResponse,
    ValidatingResponse,
    Streaming,
    /// Source has no more useful work
    Finished,
    /// Connection attempt ended by an error
    Failed,
    /// Stopped by the engine or closed after a healthy exchange
    Closed,
}

/// Why a connection stopped serving requests.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("stopped")]
    Stopped,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error("response ended at {remaining} with bytes outstanding")]
    Truncated { remaining: Range },
}

enum LeaseOutcome {
    Leased(Range),
    Exhausted,
    Stopped,
}

enum Exchange {
    /// Healthy response fully consumed, carrying this many bytes
    Delivered(u64),
    /// Response carried no content; the connection must close
    Rejected,
}

/// Drives one connection to one source.
pub struct SourceDownloader {
    source: Arc<SwarmSource>,
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    connector: Arc<dyn SourceConnector>,
    stats: Arc<SwarmStats>,
    events: mpsc::UnboundedSender<SourceNotification>,
    stop: watch::Receiver<bool>,
    lease_retry_interval: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    state: DownloaderState,
}

impl SourceDownloader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<SwarmSource>,
        coordinator: Arc<SwarmCoordinator>,
        storage: Arc<dyn SwarmStorage>,
        connector: Arc<dyn SourceConnector>,
        stats: Arc<SwarmStats>,
        events: mpsc::UnboundedSender<SourceNotification>,
        stop: watch::Receiver<bool>,
        config: &ShoalConfig,
    ) -> Self {
        Self {
            source,
            coordinator,
            storage,
            connector,
            stats,
            events,
            stop,
            lease_retry_interval: config.swarm.lease_retry_interval,
            connect_timeout: config.network.connect_timeout,
            read_timeout: config.network.read_timeout,
            state: DownloaderState::Idle,
        }
    }

    pub fn state(&self) -> DownloaderState {
        self.state
    }

    /// Runs one connection attempt to completion and returns the final state.
    ///
    /// Emits `Connected` or `ConnectFailed`, then `ResponseProcessed` per
    /// exchange and `ContentDelivered` per accepted response, `Finished`
    /// if the source ran out of work, and finally
    /// `ConnectionClosed` for any established connection.
    pub async fn run(mut self) -> DownloaderState {
        self.transition(DownloaderState::Connecting);

        let connect = self.connector.connect(&self.source);
        let attempt = until_stopped(&mut self.stop, self.connect_timeout, "connect", connect).await;
        let mut connection = match attempt {
            Ok(connection) => connection,
            Err(e) => {
                tracing::info!("Source {} failed to connect: {}", self.source, e);
                self.emit(SourceEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                self.transition(match e {
                    StepError::Stopped => DownloaderState::Closed,
                    _ => DownloaderState::Failed,
                });
                return self.state;
            }
        };
        self.emit(SourceEvent::Connected);

        let outcome = self.serve(connection.as_mut()).await;
        connection.close().await;

        let final_state = match outcome {
            Ok(state) => state,
            Err(StepError::Stopped) => {
                tracing::debug!("Source {} stopped", self.source);
                DownloaderState::Closed
            }
            Err(e) => {
                tracing::warn!("Source {} failed: {}", self.source, e);
                DownloaderState::Failed
            }
        };
        self.transition(final_state);
        self.emit(SourceEvent::ConnectionClosed);
        self.state
    }

    async fn serve(
        &mut self,
        connection: &mut dyn SourceConnection,
    ) -> Result<DownloaderState, StepError> {
        loop {
            self.transition(DownloaderState::AwaitingRequestSlot);
            let lease = match self.next_lease().await {
                LeaseOutcome::Leased(lease) => lease,
                LeaseOutcome::Exhausted => {
                    self.source.mark_finished();
                    self.emit(SourceEvent::Finished);
                    return Ok(DownloaderState::Finished);
                }
                LeaseOutcome::Stopped => return Err(StepError::Stopped),
            };

            match self.exchange(connection, lease).await? {
                Exchange::Delivered(bytes) => {
                    self.emit(SourceEvent::ContentDelivered { bytes });
                    if !connection.is_reusable() {
                        return Ok(DownloaderState::Closed);
                    }
                }
                Exchange::Rejected => return Ok(DownloaderState::Closed),
            }
        }
    }

    /// Leases the next range this source can serve, waiting while other
    /// sources hold every byte it offers.
    async fn next_lease(&mut self) -> LeaseOutcome {
        loop {
            if self.coordinator.is_complete() {
                return LeaseOutcome::Exhausted;
            }

            let available = self.source.available();
            let lease = if self.source.supports_ranges() {
                self.coordinator.lease_portion(&available)
            } else {
                self.coordinator
                    .files()
                    .files()
                    .iter()
                    .filter(|file| available.contains(&file.range()))
                    .find_map(|file| self.coordinator.lease_exact(file.range()))
            };
            if let Some(lease) = lease {
                return LeaseOutcome::Leased(lease);
            }

            if !self.coordinator.has_outstanding(&available) {
                return LeaseOutcome::Exhausted;
            }

            tracing::trace!("Source {} deferring, nothing leasable", self.source.id());
            let retry = self.lease_retry_interval;
            let coordinator = Arc::clone(&self.coordinator);
            let wait = async move {
                tokio::select! {
                    _ = coordinator.lease_available().notified() => {}
                    _ = tokio::time::sleep(retry) => {}
                }
                Ok::<(), StepError>(())
            };
            if until_stopped(&mut self.stop, Duration::MAX, "lease wait", wait)
                .await
                .is_err()
            {
                return LeaseOutcome::Stopped;
            }
        }
    }

    /// Clips `lease` to one file and builds the request and listener for it.
    ///
    /// On error the lease is returned to the coordinator.
    ///
    /// # Errors
    ///
    /// - `SwarmError::OutOfBounds` - If the lease starts past the download end
    pub fn prepare_request(
        &self,
        lease: Range,
    ) -> Result<(RangeRequest, ContentListener), SwarmError> {
        let file = match self.coordinator.swarm_file(&lease) {
            Ok(file) => file,
            Err(e) => {
                self.coordinator.unlease(lease)?;
                return Err(e);
            }
        };

        let clipped = if lease.high() > file.end() {
            self.coordinator
                .renew_lease(lease, Range::new(lease.low(), file.end()))?
        } else {
            lease
        };

        // Covered by the clip above
        let relative = file
            .to_relative(&clipped)
            .ok_or(SwarmError::OutOfBounds {
                offset: clipped.high(),
                total: self.coordinator.total_size(),
            })?;

        let request = RangeRequest {
            path: self.source.request_path(&file),
            range: self.source.supports_ranges().then_some(relative),
        };
        let listener = ContentListener::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.storage),
            file,
            clipped,
        );
        Ok((request, listener))
    }

    async fn exchange(
        &mut self,
        connection: &mut dyn SourceConnection,
        lease: Range,
    ) -> Result<Exchange, StepError> {
        self.transition(DownloaderState::Requesting);
        let (request, mut listener) = self.prepare_request(lease)?;
        let requested = listener.remaining().map_or(0, |range| range.length());
        self.stats.request_issued(requested);
        tracing::debug!(
            "Source {} requesting {} range={:?}",
            self.source.id(),
            request.path,
            request.range
        );

        // From here on the listener releases whatever is left on every exit path
        self.transition(DownloaderState::AwaitingResponse);
        let head = until_stopped(
            &mut self.stop,
            self.read_timeout,
            "response",
            connection.send_request(&request),
        )
        .await?;

        self.stats.response_processed();
        let status = SourceStatus::new(head.status);
        self.emit(SourceEvent::ResponseProcessed { status });

        if !status.delivers_content() {
            tracing::debug!("Source {} answered {}", self.source.id(), head.status);
            listener.finished();
            return Ok(Exchange::Rejected);
        }

        self.transition(DownloaderState::ValidatingResponse);
        listener.initialize(&head)?;
        let accepted = listener.remaining().map_or(0, |range| range.length());

        self.transition(DownloaderState::Streaming);
        while !listener.is_satisfied() {
            let chunk = until_stopped(
                &mut self.stop,
                self.read_timeout,
                "body read",
                connection.next_chunk(),
            )
            .await?;
            let Some(chunk) = chunk else {
                break;
            };

            self.stats.content_received(chunk.len() as u64);
            let store = listener.content_available(chunk);
            until_stopped(&mut self.stop, Duration::MAX, "store", store).await?;
        }

        if let Some(remaining) = listener.remaining() {
            listener.finished();
            return Err(StepError::Truncated { remaining });
        }
        listener.finished();

        if connection.is_reusable() {
            return Ok(Exchange::Delivered(accepted));
        }
        // Body framing still open: anything more is surplus
        let trailing = until_stopped(
            &mut self.stop,
            self.read_timeout,
            "body drain",
            connection.next_chunk(),
        )
        .await?;
        match trailing {
            Some(extra) if !extra.is_empty() => Err(ContentError::Overrun {
                surplus: extra.len(),
            }
            .into()),
            _ => Ok(Exchange::Delivered(accepted)),
        }
    }

    fn transition(&mut self, state: DownloaderState) {
        if self.state != state {
            tracing::trace!(
                "Source {} {:?} -> {:?}",
                self.source.id(),
                self.state,
                state
            );
            self.state = state;
        }
    }

    fn emit(&self, event: SourceEvent) {
        let notification = SourceNotification {
            source: self.source.id(),
            event,
        };
        // Engine gone means nobody is listening
        let _ = self.events.send(notification);
    }
}

/// Runs `operation` until it completes, `limit` elapses, or a stop is requested.
async fn until_stopped<T, E, F>(
    stop: &mut watch::Receiver<bool>,
    limit: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, StepError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StepError>,
{
    if *stop.borrow() {
        return Err(StepError::Stopped);
    }

    let timed = async {
        if limit == Duration::MAX {
            return Some(future.await);
        }
        tokio::time::timeout(limit, future).await.ok()
    };

    tokio::select! {
        result = timed => match result {
            Some(result) => result.map_err(Into::into),
            None => Err(ConnectionError::Timeout { operation, after: limit }.into()),
        },
        // A dropped sender also counts as a stop
        _ = stop.wait_for(|stopped| *stopped) => Err(StepError::Stopped),
    }
}
