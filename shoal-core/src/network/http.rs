//! HTTP range requests through a shared reqwest client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use url::Url;

use super::{
    BandwidthTracker, ConnectionError, Direction, RangeRequest, ResponseHead, SourceConnection,
    SourceConnector,
};
use crate::config::NetworkConfig;
use crate::swarm::SwarmSource;

/// Connects to `http://` and `https://` sources.
///
/// All connections share one client, so sockets to the same mirror are
/// pooled and reused across requests.
pub struct HttpConnector {
    client: reqwest::Client,
    bandwidth: Arc<BandwidthTracker>,
}

impl HttpConnector {
    /// Creates a connector recording body traffic into `bandwidth`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Request` - HTTP client could not be built from `config`
    pub fn new(
        config: &NetworkConfig,
        bandwidth: Arc<BandwidthTracker>,
    ) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| ConnectionError::Request {
                reason: format!("HTTP client creation failed: {e}"),
            })?;

        Ok(Self { client, bandwidth })
    }
}

#[async_trait]
impl SourceConnector for HttpConnector {
    async fn connect(
        &self,
        source: &SwarmSource,
    ) -> Result<Box<dyn SourceConnection>, ConnectionError> {
        let url = source.url();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConnectionError::InvalidUrl {
                url: url.to_string(),
                reason: "only http and https sources are supported".to_string(),
            });
        }
        tracing::debug!("Opened client for {} ({})", source.address(), source.id());

        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            base: url.clone(),
            address: source.address(),
            bandwidth: Arc::clone(&self.bandwidth),
            response: None,
            body_remaining: None,
            failed: false,
        }))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    base: Url,
    address: String,
    bandwidth: Arc<BandwidthTracker>,
    response: Option<reqwest::Response>,
    /// Body bytes still announced by Content-Length
    body_remaining: Option<u64>,
    failed: bool,
}

impl HttpConnection {
    fn request_error(&mut self, error: reqwest::Error) -> ConnectionError {
        self.failed = true;
        self.response = None;

        if error.is_connect() {
            ConnectionError::Connect {
                address: self.address.clone(),
                reason: error.to_string(),
            }
        } else if error.is_body() || error.is_decode() {
            tracing::trace!("Body from {} ended early: {}", self.address, error);
            ConnectionError::Closed
        } else {
            ConnectionError::Request {
                reason: error.to_string(),
            }
        }
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_string())
}

#[async_trait]
impl SourceConnection for HttpConnection {
    async fn send_request(
        &mut self,
        request: &RangeRequest,
    ) -> Result<ResponseHead, ConnectionError> {
        if self.response.is_some() {
            return Err(ConnectionError::MalformedResponse {
                reason: "previous response body not drained".to_string(),
            });
        }

        let url = self
            .base
            .join(&request.path)
            .map_err(|e| ConnectionError::InvalidUrl {
                url: format!("{}{}", self.base, request.path),
                reason: e.to_string(),
            })?;

        let mut builder = self
            .client
            .get(url)
            .header(header::ACCEPT_ENCODING, "identity");
        if let Some(range) = request.range_header() {
            builder = builder.header(header::RANGE, range);
        }
        tracing::trace!("Sending GET {} range={:?}", request.path, request.range);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.request_error(e)),
        };

        let headers = response.headers();
        let content_length = header_value(headers, header::CONTENT_LENGTH);
        let content_range = header_value(headers, header::CONTENT_RANGE);
        let keep_alive = !header_value(headers, header::CONNECTION)
            .is_some_and(|value| value.eq_ignore_ascii_case("close"));
        let head = ResponseHead {
            status: response.status().as_u16(),
            content_length,
            content_range,
            keep_alive,
        };

        self.body_remaining = response.content_length();
        if self.body_remaining != Some(0) {
            self.response = Some(response);
        }
        Ok(head)
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };

        match response.chunk().await {
            Ok(Some(chunk)) => {
                self.bandwidth
                    .record(Direction::Downstream, chunk.len() as u64);
                if let Some(remaining) = self.body_remaining.as_mut() {
                    *remaining = remaining.saturating_sub(chunk.len() as u64);
                    if *remaining == 0 {
                        self.response = None;
                    }
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.response = None;
                Ok(None)
            }
            Err(e) => Err(self.request_error(e)),
        }
    }

    fn is_reusable(&self) -> bool {
        !self.failed && self.response.is_none()
    }

    async fn close(&mut self) {
        self.response = None;
        self.failed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::range::Range;

    const BODY: &[u8] = b"hello world";

    async fn ranged(headers: HeaderMap) -> axum::response::Response {
        let requested = headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.split_once('-'))
            .and_then(|(low, high)| Some((low.parse::<usize>().ok()?, high.parse::<usize>().ok()?)));

        match requested {
            Some((low, high)) => {
                let high = high.min(BODY.len() - 1);
                let content_range = format!("bytes {low}-{high}/{}", BODY.len());
                (
                    StatusCode::PARTIAL_CONTENT,
                    [(header::CONTENT_RANGE, content_range)],
                    BODY[low..=high].to_vec(),
                )
                    .into_response()
            }
            None => (StatusCode::OK, BODY.to_vec()).into_response(),
        }
    }

    async fn serve_router() -> String {
        let app = Router::new()
            .route("/data.bin", get(ranged))
            .route("/busy", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}/data.bin")
    }

    async fn serve_truncated() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{address}/data.bin")
    }

    fn tracker() -> Arc<BandwidthTracker> {
        Arc::new(BandwidthTracker::new(Duration::from_secs(1)))
    }

    fn connector(bandwidth: Arc<BandwidthTracker>) -> HttpConnector {
        HttpConnector::new(&NetworkConfig::default(), bandwidth).unwrap()
    }

    async fn collect(connection: &mut Box<dyn SourceConnection>) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = connection.next_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        body
    }

    fn request(path: &str, range: Option<Range>) -> RangeRequest {
        RangeRequest {
            path: path.to_string(),
            range,
        }
    }

    #[tokio::test]
    async fn test_range_request_maps_partial_content() {
        let bandwidth = tracker();
        let url = serve_router().await;
        let source = SwarmSource::parse(&url).unwrap();
        let mut connection = connector(Arc::clone(&bandwidth))
            .connect(&source)
            .await
            .unwrap();

        let head = connection
            .send_request(&request("/data.bin", Some(Range::new(6, 10))))
            .await
            .unwrap();
        assert_eq!(head.status, 206);
        assert_eq!(head.content_range.as_deref(), Some("bytes 6-10/11"));
        assert_eq!(head.content_length.as_deref(), Some("5"));
        assert_eq!(collect(&mut connection).await, b"world");
        assert!(connection.is_reusable());
        assert_eq!(bandwidth.total(Direction::Downstream), 5);
    }

    #[tokio::test]
    async fn test_connection_serves_sequential_requests() {
        let url = serve_router().await;
        let source = SwarmSource::parse(&url).unwrap();
        let mut connection = connector(tracker()).connect(&source).await.unwrap();

        let whole = connection
            .send_request(&request("/data.bin", None))
            .await
            .unwrap();
        assert_eq!(whole.status, 200);
        assert_eq!(whole.content_range, None);
        assert_eq!(collect(&mut connection).await, BODY);

        connection
            .send_request(&request("/data.bin", Some(Range::new(0, 4))))
            .await
            .unwrap();
        assert_eq!(collect(&mut connection).await, b"hello");
    }

    #[tokio::test]
    async fn test_error_status_has_empty_body() {
        let url = serve_router().await;
        let source = SwarmSource::parse(&url).unwrap();
        let mut connection = connector(tracker()).connect(&source).await.unwrap();

        let head = connection
            .send_request(&request("/busy", Some(Range::new(0, 4))))
            .await
            .unwrap();
        assert_eq!(head.status, 503);
        assert_eq!(connection.next_chunk().await.unwrap(), None);
        assert!(connection.is_reusable());
    }

    #[tokio::test]
    async fn test_undrained_body_blocks_next_request() {
        let url = serve_router().await;
        let source = SwarmSource::parse(&url).unwrap();
        let mut connection = connector(tracker()).connect(&source).await.unwrap();

        connection
            .send_request(&request("/data.bin", None))
            .await
            .unwrap();
        assert!(!connection.is_reusable());
        assert!(matches!(
            connection.send_request(&request("/data.bin", None)).await,
            Err(ConnectionError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_closed_error() {
        let url = serve_truncated().await;
        let source = SwarmSource::parse(&url).unwrap();
        let mut connection = connector(tracker()).connect(&source).await.unwrap();

        connection
            .send_request(&request("/data.bin", None))
            .await
            .unwrap();
        let mut received = Vec::new();
        let error = loop {
            match connection.next_chunk().await {
                Ok(Some(chunk)) => received.extend_from_slice(&chunk),
                Ok(None) => panic!("truncated body reported as complete"),
                Err(e) => break e,
            }
        };
        assert_eq!(received, b"hel");
        assert!(matches!(error, ConnectionError::Closed));
        assert!(!connection.is_reusable());
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let source = SwarmSource::parse(&format!("http://{address}/data.bin")).unwrap();
        let mut connection = connector(tracker()).connect(&source).await.unwrap();
        let result = connection
            .send_request(&request("/data.bin", None))
            .await;
        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_accepts_https_and_rejects_other_schemes() {
        let connector = connector(tracker());

        let secure = SwarmSource::parse("https://mirror.example/file").unwrap();
        assert!(connector.connect(&secure).await.is_ok());

        let ftp = SwarmSource::parse("ftp://mirror.example/file").unwrap();
        assert!(matches!(
            connector.connect(&ftp).await,
            Err(ConnectionError::InvalidUrl { .. })
        ));
    }
}
