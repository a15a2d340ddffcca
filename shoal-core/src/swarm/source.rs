//! Source descriptors.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use url::Url;

use super::{SwarmError, SwarmFile};
use crate::range::{IntervalSet, Range};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// A remote location that can serve some or all of the download.
///
/// The advertised byte ranges may change while the source is in use.
/// The finished flag is set once and never cleared.
#[derive(Debug)]
pub struct SwarmSource {
    id: SourceId,
    url: Url,
    available: RwLock<IntervalSet>,
    supports_ranges: bool,
    finished: AtomicBool,
}

impl SwarmSource {
    /// Creates a source claiming every byte and supporting range requests.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidSource` - If `url` is not an absolute URL with a host
    pub fn parse(url: &str) -> Result<Self, SwarmError> {
        let parsed = Url::parse(url).map_err(|e| SwarmError::InvalidSource {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.host_str().is_none() {
            return Err(SwarmError::InvalidSource {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(Self {
            id: SourceId::next(),
            url: parsed,
            available: RwLock::new(IntervalSet::singleton(Range::new(0, u64::MAX))),
            supports_ranges: true,
            finished: AtomicBool::new(false),
        })
    }

    /// Restricts the bytes this source claims to hold.
    pub fn with_available(self, available: IntervalSet) -> Self {
        *self.available.write() = available;
        self
    }

    /// Marks the source as only able to serve whole files.
    pub fn without_range_support(mut self) -> Self {
        self.supports_ranges = false;
        self
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host:port` the source is reached at.
    pub fn address(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn supports_ranges(&self) -> bool {
        self.supports_ranges
    }

    /// Snapshot of the advertised byte ranges.
    pub fn available(&self) -> IntervalSet {
        self.available.read().clone()
    }

    /// Adds newly advertised bytes.
    pub fn advertise(&self, range: Range) {
        self.available.write().add(range);
    }

    /// Withdraws bytes the source no longer offers.
    pub fn withdraw(&self, range: Range) {
        self.available.write().remove(range);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Marks the source as having no more useful work. Irreversible.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Request path for `file`.
    ///
    /// A URL path ending in `/` names a directory: the file's own path is
    /// appended to it, one percent-encoded segment at a time.
    pub fn request_path(&self, file: &SwarmFile) -> String {
        let mut path = self.url.path().to_string();
        if path.ends_with('/') {
            let encoded: Vec<String> = file
                .path()
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect();
            path.push_str(&encoded.join("/"));
        }
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }
}

impl fmt::Display for SwarmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}
