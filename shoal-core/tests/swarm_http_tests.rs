//! End-to-end swarm downloads over loopback HTTP.
//!
//! An axum router serving fixture files stands in for real mirrors; the
//! engine downloads through the production `HttpConnector` into
//! `FileSystemStorage`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use shoal_core::config::ShoalConfig;
use shoal_core::engine::{SwarmEngineHandle, spawn_swarm_engine};
use shoal_core::network::HttpConnector;
use shoal_core::stats::SwarmStats;
use shoal_core::storage::FileSystemStorage;
use shoal_core::swarm::{
    CoordinatorEvent, SourceEvent, Sha1BlockVerifier, SwarmCoordinator, SwarmFileSystem,
    SwarmSource,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(20);

/// How the test server answers.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ServerMode {
    /// Honors Range headers with 206 responses
    Ranges,
    /// Always answers 200 with the whole file
    WholeFile,
    /// Answers every request with 503
    Unavailable,
}

/// Mirror contents shared by the router's handlers.
struct Mirror {
    files: HashMap<String, Vec<u8>>,
    mode: ServerMode,
    requests: Arc<AtomicUsize>,
}

struct TestServer {
    base_url: String,
    requests: Arc<AtomicUsize>,
}

async fn spawn_server(files: HashMap<String, Vec<u8>>, mode: ServerMode) -> TestServer {
    let requests = Arc::new(AtomicUsize::new(0));
    let mirror = Arc::new(Mirror {
        files,
        mode,
        requests: Arc::clone(&requests),
    });
    let app = Router::new()
        .route("/pub/{*path}", get(serve_file))
        .with_state(mirror);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{address}/pub/"),
        requests,
    }
}

async fn serve_file(
    State(mirror): State<Arc<Mirror>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    mirror.requests.fetch_add(1, Ordering::SeqCst);

    let Some(content) = mirror.files.get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if mirror.mode == ServerMode::Unavailable {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let total = content.len() as u64;
    match (mirror.mode, parse_range(&headers)) {
        (ServerMode::Ranges, Some((low, high))) if low < total => {
            let high = high.min(total - 1);
            let content_range = format!("bytes {low}-{high}/{total}");
            let body = content[low as usize..=high as usize].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                body,
            )
                .into_response()
        }
        (ServerMode::Ranges, Some(_)) => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total}"))],
        )
            .into_response(),
        _ => (StatusCode::OK, content.clone()).into_response(),
    }
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (low, high) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((low.parse().ok()?, high.parse().ok()?))
}

fn content(seed: u8, length: usize) -> Vec<u8> {
    (0..length)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Test fixture wiring an engine to disk storage.
struct DownloadFixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    coordinator: Arc<SwarmCoordinator>,
    handle: SwarmEngineHandle,
}

impl DownloadFixture {
    fn new(coordinator: SwarmCoordinator) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        let config = ShoalConfig::for_testing();
        let coordinator = Arc::new(coordinator);
        let stats = Arc::new(SwarmStats::new(config.network.bandwidth_window));
        let connector = Arc::new(HttpConnector::new(&config.network, stats.bandwidth()).unwrap());
        let storage = Arc::new(FileSystemStorage::new(&root, &config.storage));

        let handle = spawn_swarm_engine(
            config,
            Arc::clone(&coordinator),
            storage,
            connector,
            stats,
        );
        Self {
            _dir: dir,
            root,
            coordinator,
            handle,
        }
    }

    async fn wait_for_completion(&self) {
        let mut events = self.coordinator.subscribe();
        if self.coordinator.is_complete() {
            return;
        }
        timeout(LIMIT, async {
            loop {
                match events.recv().await {
                    Ok(CoordinatorEvent::DownloadCompleted) => return,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        if self.coordinator.is_complete() {
                            return;
                        }
                    }
                    Err(e) => panic!("coordinator events closed: {e}"),
                }
            }
        })
        .await
        .expect("download did not complete");
    }

    fn read(&self, path: &str) -> Vec<u8> {
        std::fs::read(self.root.join(path)).unwrap()
    }
}

fn files_of(entries: &[(&str, &Vec<u8>)]) -> HashMap<String, Vec<u8>> {
    entries
        .iter()
        .map(|(path, content)| (path.to_string(), (*content).clone()))
        .collect()
}

#[tokio::test]
async fn test_multi_file_download_from_two_mirrors() {
    let a = content(1, 30_000);
    let b = content(2, 20_000);
    let served = files_of(&[("a.bin", &a), ("nested/b.bin", &b)]);
    let first = spawn_server(served.clone(), ServerMode::Ranges).await;
    let second = spawn_server(served, ServerMode::Ranges).await;

    let files = SwarmFileSystem::new([("a.bin", 30_000), ("nested/b.bin", 20_000)]).unwrap();
    let config = ShoalConfig::for_testing();
    let fixture = DownloadFixture::new(SwarmCoordinator::new(files, &config.swarm));

    fixture
        .handle
        .add_source(SwarmSource::parse(&first.base_url).unwrap())
        .await
        .unwrap();
    fixture
        .handle
        .add_source(SwarmSource::parse(&second.base_url).unwrap())
        .await
        .unwrap();
    fixture.wait_for_completion().await;

    let stats = fixture.handle.stats().await.unwrap();
    assert!(stats.complete);
    assert_eq!(stats.counters.bytes_received, 50_000);
    assert!(first.requests.load(Ordering::SeqCst) + second.requests.load(Ordering::SeqCst) >= 13);
    fixture.handle.shutdown().await.unwrap();

    assert_eq!(fixture.read("a.bin"), a);
    assert_eq!(fixture.read("nested/b.bin"), b);
}

#[tokio::test]
async fn test_whole_file_server_with_verification() {
    let a = content(3, 9_000);
    let server = spawn_server(files_of(&[("a.bin", &a)]), ServerMode::WholeFile).await;

    let files = SwarmFileSystem::single("a.bin", 9_000).unwrap();
    let config = ShoalConfig::for_testing();
    let verifier = Sha1BlockVerifier::from_content(1024, &a).unwrap();
    let coordinator = SwarmCoordinator::with_verifier(files, &config.swarm, Arc::new(verifier));
    let fixture = DownloadFixture::new(coordinator);

    let source = SwarmSource::parse(&server.base_url)
        .unwrap()
        .without_range_support();
    fixture.handle.add_source(source).await.unwrap();
    fixture.wait_for_completion().await;

    assert_eq!(fixture.coordinator.amount_verified(), 9_000);
    assert_eq!(fixture.coordinator.amount_lost(), 0);
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
    fixture.handle.shutdown().await.unwrap();

    assert_eq!(fixture.read("a.bin"), a);
}

#[tokio::test]
async fn test_unavailable_mirror_is_dropped() {
    let a = content(4, 5_000);
    let server = spawn_server(files_of(&[("a.bin", &a)]), ServerMode::Unavailable).await;

    let files = SwarmFileSystem::single("a.bin", 5_000).unwrap();
    let config = ShoalConfig::for_testing();
    let fixture = DownloadFixture::new(SwarmCoordinator::new(files, &config.swarm));
    let mut events = fixture.handle.subscribe().await.unwrap();

    fixture
        .handle
        .add_source(SwarmSource::parse(&server.base_url).unwrap())
        .await
        .unwrap();

    let mut seen = Vec::new();
    timeout(LIMIT, async {
        while let Ok(notification) = events.recv().await {
            let terminal = notification.event.is_terminal();
            seen.push(notification.event);
            if terminal {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(seen.first(), Some(&SourceEvent::Connected));
    assert!(matches!(
        seen.get(1),
        Some(SourceEvent::ResponseProcessed { status }) if status.code == 503
    ));
    assert_eq!(seen.last(), Some(&SourceEvent::ConnectionClosed));

    let stats = fixture.handle.stats().await.unwrap();
    assert_eq!(stats.active_sources, 0);
    assert_eq!(stats.leases.needed, 5_000);
    assert_eq!(stats.leases.leased, 0);
    fixture.handle.shutdown().await.unwrap();
}
