//! In-process source connector with scripted behaviors.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shoal_core::network::{
    ConnectionError, RangeRequest, ResponseHead, SourceConnection, SourceConnector,
};
use shoal_core::swarm::SwarmSource;

use crate::behavior::SourceBehavior;
use crate::network::NetworkSimulator;

/// A request seen by the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub host: String,
    pub request: RangeRequest,
}

/// Serves in-memory files to the swarm engine.
///
/// Files are keyed by request path. Sources are told apart by URL host;
/// hosts without a configured behavior are honest.
pub struct SimulatedConnector {
    seed: u64,
    files: Arc<HashMap<String, Bytes>>,
    behaviors: HashMap<String, SourceBehavior>,
    network: NetworkSimulator,
    connections: AtomicU64,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl SimulatedConnector {
    /// Creates a connector serving nothing, seeded for deterministic chunking.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            files: Arc::new(HashMap::new()),
            behaviors: HashMap::new(),
            network: NetworkSimulator::new(),
            connections: AtomicU64::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serves `content` at request path `path`.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Arc::make_mut(&mut self.files).insert(path.into(), content.into());
        self
    }

    /// Makes every source on `host` behave as `behavior`.
    pub fn with_behavior(mut self, host: impl Into<String>, behavior: SourceBehavior) -> Self {
        self.behaviors.insert(host.into(), behavior);
        self
    }

    /// Applies simulated network conditions to every connection.
    pub fn with_network(mut self, network: NetworkSimulator) -> Self {
        self.network = network;
        self
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Connection attempts so far, refused ones included.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    fn behavior_for(&self, host: &str) -> SourceBehavior {
        self.behaviors.get(host).copied().unwrap_or_default()
    }
}

#[async_trait]
impl SourceConnector for SimulatedConnector {
    async fn connect(
        &self,
        source: &SwarmSource,
    ) -> Result<Box<dyn SourceConnection>, ConnectionError> {
        let attempt = self.connections.fetch_add(1, Ordering::Relaxed);
        let host = source.url().host_str().unwrap_or_default().to_string();
        let behavior = self.behavior_for(&host);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(attempt));
        let latency = self.network.latency(&mut rng);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if behavior == SourceBehavior::Refusing {
            return Err(ConnectionError::Connect {
                address: source.address(),
                reason: "simulated refusal".to_string(),
            });
        }

        tracing::trace!("Simulated connection {} to {} ({:?})", attempt, host, behavior);
        Ok(Box::new(SimulatedConnection {
            host,
            behavior,
            files: Arc::clone(&self.files),
            network: self.network.clone(),
            rng,
            requests: Arc::clone(&self.requests),
            body: VecDeque::new(),
            truncated: false,
            open: true,
        }))
    }
}

struct SimulatedConnection {
    host: String,
    behavior: SourceBehavior,
    files: Arc<HashMap<String, Bytes>>,
    network: NetworkSimulator,
    rng: ChaCha8Rng,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    body: VecDeque<Bytes>,
    truncated: bool,
    open: bool,
}

impl SimulatedConnection {
    fn respond(&mut self, request: &RangeRequest) -> (ResponseHead, Bytes) {
        let keep_alive = self.behavior.keeps_alive();
        let Some(content) = self.files.get(&request.path).cloned() else {
            return (status_only(404), Bytes::new());
        };
        let total = content.len() as u64;
        if total == 0 {
            return (status_only(416), Bytes::new());
        }

        let (low, high) = request
            .range
            .map_or((0, total - 1), |range| (range.low(), range.high().min(total - 1)));
        if low > high {
            return (status_only(416), Bytes::new());
        }
        let slice = |low: u64, high: u64| content.slice(low as usize..=high as usize);
        let ranged = |low: u64, high: u64| ResponseHead {
            status: if request.range.is_some() { 206 } else { 200 },
            content_length: Some((high - low + 1).to_string()),
            content_range: request
                .range
                .map(|_| format!("bytes {}-{}/{}", low, high, total)),
            keep_alive,
        };

        match self.behavior {
            SourceBehavior::Honest | SourceBehavior::Refusing => {
                (ranged(low, high), slice(low, high))
            }
            SourceBehavior::ShortResponse { max_bytes } => {
                let high = high.min(low + max_bytes.max(1) - 1);
                (ranged(low, high), slice(low, high))
            }
            SourceBehavior::InvertedRange => {
                let head = ResponseHead {
                    status: 206,
                    content_length: Some((high - low + 1).to_string()),
                    content_range: Some(format!("bytes {}-{}/{}", high + 1, low, total)),
                    keep_alive,
                };
                (head, slice(low, high))
            }
            SourceBehavior::Truncating { after } => {
                let cut = high.min(low + after).saturating_sub(1).max(low);
                self.truncated = true;
                let body = if after == 0 {
                    Bytes::new()
                } else {
                    slice(low, cut)
                };
                (ranged(low, high), body)
            }
            SourceBehavior::ErrorStatus(code) => (status_only(code), Bytes::new()),
            SourceBehavior::IgnoresRanges => {
                let head = ResponseHead {
                    status: 200,
                    content_length: Some(total.to_string()),
                    content_range: None,
                    keep_alive,
                };
                (head, content.clone())
            }
            SourceBehavior::Overrunning { extra } => {
                let mut body = slice(low, high).to_vec();
                body.extend(std::iter::repeat_n(0xAA, extra as usize));
                (ranged(low, high), Bytes::from(body))
            }
            SourceBehavior::Corrupt => {
                let body: Vec<u8> = slice(low, high).iter().map(|byte| !byte).collect();
                (ranged(low, high), Bytes::from(body))
            }
        }
    }
}

fn status_only(status: u16) -> ResponseHead {
    ResponseHead {
        status,
        content_length: Some("0".to_string()),
        content_range: None,
        keep_alive: false,
    }
}

#[async_trait]
impl SourceConnection for SimulatedConnection {
    async fn send_request(
        &mut self,
        request: &RangeRequest,
    ) -> Result<ResponseHead, ConnectionError> {
        if !self.open {
            return Err(ConnectionError::Closed);
        }
        self.requests.lock().push(RecordedRequest {
            host: self.host.clone(),
            request: request.clone(),
        });

        let latency = self.network.latency(&mut self.rng);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (head, mut body) = self.respond(request);
        self.body.clear();
        while !body.is_empty() {
            let size = self.network.chunk_size(&mut self.rng).min(body.len());
            self.body.push_back(body.split_to(size));
        }
        if !head.keep_alive {
            self.open = false;
        }
        Ok(head)
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        match self.body.pop_front() {
            Some(chunk) => {
                let delay = self.network.bandwidth_delay(chunk.len());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Some(chunk))
            }
            None if self.truncated => {
                self.truncated = false;
                Err(ConnectionError::Closed)
            }
            None => Ok(None),
        }
    }

    fn is_reusable(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
        self.body.clear();
    }
}
