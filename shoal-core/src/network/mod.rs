//! Network abstractions for talking to sources.
//!
//! The swarm engine only needs "send a byte-range request, read response
//! metadata, stream the body". [`SourceConnector`] and [`SourceConnection`]
//! capture exactly that, so tests and simulations can replace the real
//! HTTP transport.

mod bandwidth;
mod http;

use std::time::Duration;

use async_trait::async_trait;
pub use bandwidth::{BandwidthTracker, Direction};
use bytes::Bytes;
pub use http::HttpConnector;

use crate::range::Range;
use crate::swarm::{StatusClass, SwarmSource};

/// One outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    /// Request path including any query
    pub path: String,
    /// File-relative byte range, `None` to request the whole file
    pub range: Option<Range>,
}

impl RangeRequest {
    /// Value of the `Range` header, if any.
    pub fn range_header(&self) -> Option<String> {
        self.range
            .map(|range| format!("bytes={}-{}", range.low(), range.high()))
    }
}

/// Response metadata as reported by the source.
///
/// Header values are kept raw; validating them is the listener's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<String>,
    pub content_range: Option<String>,
    pub keep_alive: bool,
}

impl ResponseHead {
    /// Coarse classification of the status code.
    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_code(self.status)
    }
}

/// Opens connections to sources.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connects to `source`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidUrl` - Source URL cannot be used by this connector
    /// - `ConnectionError::Connect` - Connection could not be established
    async fn connect(
        &self,
        source: &SwarmSource,
    ) -> Result<Box<dyn SourceConnection>, ConnectionError>;
}

/// One open connection serving sequential requests.
#[async_trait]
pub trait SourceConnection: Send {
    /// Sends a request and waits for the response head.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Connect` - Source could not be reached
    /// - `ConnectionError::Request` - Request failed before a response arrived
    /// - `ConnectionError::MalformedResponse` - Previous body was not drained
    /// - `ConnectionError::Closed` - Peer closed before the head arrived
    async fn send_request(&mut self, request: &RangeRequest)
    -> Result<ResponseHead, ConnectionError>;

    /// Next piece of the current response body, `None` at its end.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` - Peer closed before the body ended
    /// - `ConnectionError::Request` - Transport failed while reading the body
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ConnectionError>;

    /// Whether another request may be sent once the body is drained.
    fn is_reusable(&self) -> bool;

    /// Closes the connection.
    async fn close(&mut self);
}

/// Errors from source connections.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Request failed: {reason}")]
    Request { reason: String },

    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Connection closed by source")]
    Closed,
}
