//! Response validation and content streaming for one request.

use std::sync::Arc;

use bytes::Bytes;

use super::{SwarmCoordinator, SwarmError, SwarmFile, WriteJob};
use crate::network::ResponseHead;
use crate::range::Range;
use crate::storage::SwarmStorage;

/// Errors validating or streaming a response.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// A numeric header could not be parsed
    #[error("Unparseable {header} header: {value:?}")]
    Parse {
        /// Header name
        header: &'static str,
        /// Raw header value
        value: String,
    },

    /// Response claims an inverted or out-of-file range
    #[error("Invalid response range {low}-{high} for file of {file_length} bytes")]
    InvalidRange {
        /// Claimed first byte
        low: u64,
        /// Claimed last byte
        high: u64,
        /// Destination file size
        file_length: u64,
    },

    /// Response claims a total size different from the destination file
    #[error("Response total {total} does not match file length {file_length}")]
    TotalMismatch {
        /// Claimed total size
        total: u64,
        /// Destination file size
        file_length: u64,
    },

    /// Response announces no content at all
    #[error("Response carries no content")]
    Empty,

    /// Response range is not inside the requested range
    #[error("Response range {actual} exceeds requested {expected}")]
    ExceedsRequest {
        /// Range that was requested
        expected: Range,
        /// Range the response claims
        actual: Range,
    },

    /// Response delivered more bytes than it announced
    #[error("Response delivered {surplus} bytes past its announced range")]
    Overrun {
        /// Bytes beyond the expected range
        surplus: usize,
    },

    /// Content arrived before the response was validated
    #[error("Content received before response validation")]
    NotInitialized,

    /// Content arrived after the listener finished
    #[error("Content received after listener finished")]
    Finished,

    /// Lease bookkeeping or storage failed
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),
}

/// Parsed `Content-Range` value in file-relative coordinates.
///
/// `range` is `None` for the `*` form, `total` is `None` when the size is
/// unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub range: Option<(u64, u64)>,
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parses `bytes start-end/total`, `bytes start-end/*`, `bytes */total`
    /// or `bytes */*`.
    ///
    /// Bounds are returned as sent; ordering is checked by the caller.
    ///
    /// # Errors
    ///
    /// - `ContentError::Parse` - If the value does not follow any accepted form
    pub fn parse(value: &str) -> Result<Self, ContentError> {
        let malformed = || ContentError::Parse {
            header: "Content-Range",
            value: value.to_string(),
        };

        let trimmed = value.trim();
        let ranges = trimmed
            .get(..5)
            .filter(|unit| unit.eq_ignore_ascii_case("bytes"))
            .map(|_| &trimmed[5..])
            .ok_or_else(malformed)?;
        // Some servers send "bytes=" instead of "bytes "
        let ranges = ranges.strip_prefix('=').unwrap_or(ranges).trim();

        let (range, total) = ranges.split_once('/').ok_or_else(malformed)?;
        let total = match total.trim() {
            "*" => None,
            digits => Some(parse_number(digits).ok_or_else(malformed)?),
        };
        let range = match range.trim() {
            "*" => None,
            bounds => {
                let (low, high) = bounds.split_once('-').ok_or_else(malformed)?;
                let low = parse_number(low.trim()).ok_or_else(malformed)?;
                let high = parse_number(high.trim()).ok_or_else(malformed)?;
                Some((low, high))
            }
        };

        Ok(Self { range, total })
    }
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Validates one response against its lease and streams its body to storage.
///
/// The listener owns the leased range it was created for. Whatever part of
/// that range has not been consumed when [`ContentListener::finished`] runs
/// is returned to the coordinator, so an abandoned request never strands
/// leased bytes.
pub struct ContentListener {
    coordinator: Arc<SwarmCoordinator>,
    storage: Arc<dyn SwarmStorage>,
    file: SwarmFile,
    expected: Option<Range>,
    initialized: bool,
    write_job: Option<WriteJob>,
    finished: bool,
}

impl ContentListener {
    /// Creates a listener for the aggregate range `expected` inside `file`.
    pub fn new(
        coordinator: Arc<SwarmCoordinator>,
        storage: Arc<dyn SwarmStorage>,
        file: SwarmFile,
        expected: Range,
    ) -> Self {
        Self {
            coordinator,
            storage,
            file,
            expected: Some(expected),
            initialized: false,
            write_job: None,
            finished: false,
        }
    }

    /// Aggregate bytes still expected from the response.
    pub fn remaining(&self) -> Option<Range> {
        self.expected
    }

    /// Whether [`ContentListener::finished`] already ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Determines the range the response will deliver and returns the
    /// rest of the lease.
    ///
    /// On error the listener is finished and its whole lease released.
    ///
    /// # Errors
    ///
    /// - `ContentError::Parse` - Unparseable `Content-Range` or `Content-Length`
    /// - `ContentError::InvalidRange` - Inverted range or range past the file end
    /// - `ContentError::TotalMismatch` - Claimed total differs from the file size
    /// - `ContentError::Empty` - Zero `Content-Length`
    /// - `ContentError::ExceedsRequest` - Range not inside the requested one
    pub fn initialize(&mut self, head: &ResponseHead) -> Result<(), ContentError> {
        if self.finished {
            return Err(ContentError::Finished);
        }

        match self.reconcile(head) {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Rejecting response for {}: {}", self.file.path(), e);
                self.finished();
                Err(e)
            }
        }
    }

    fn reconcile(&mut self, head: &ResponseHead) -> Result<(), ContentError> {
        let Some(expected) = self.expected else {
            return Err(ContentError::Finished);
        };

        let relative = self.actual_relative_range(head)?;
        let actual = self
            .file
            .to_aggregate(&relative)
            .ok_or(ContentError::InvalidRange {
                low: relative.low(),
                high: relative.high(),
                file_length: self.file.length(),
            })?;

        if !expected.contains(&actual) {
            return Err(ContentError::ExceedsRequest { expected, actual });
        }

        if expected.low() < actual.low() {
            self.coordinator
                .unlease(Range::new(expected.low(), actual.low() - 1))?;
        }
        if actual.high() < expected.high() {
            self.coordinator
                .unlease(Range::new(actual.high() + 1, expected.high()))?;
        }
        if actual != expected {
            tracing::debug!("Response narrowed {} to {}", expected, actual);
        }

        self.expected = Some(actual);
        Ok(())
    }

    fn actual_relative_range(&self, head: &ResponseHead) -> Result<Range, ContentError> {
        let file_length = self.file.length();
        let whole_file = Range::new(0, file_length - 1);

        if let Some(value) = head.content_range.as_deref() {
            let parsed = ContentRange::parse(value)?;
            if let Some(total) = parsed.total {
                if total != file_length {
                    return Err(ContentError::TotalMismatch { total, file_length });
                }
            }
            return match parsed.range {
                None => Ok(whole_file),
                Some((low, high)) if low > high || high >= file_length => {
                    Err(ContentError::InvalidRange {
                        low,
                        high,
                        file_length,
                    })
                }
                Some((low, high)) => Ok(Range::new(low, high)),
            };
        }

        if let Some(value) = head.content_length.as_deref() {
            let length = parse_number(value.trim()).ok_or_else(|| ContentError::Parse {
                header: "Content-Length",
                value: value.to_string(),
            })?;
            if length == 0 {
                return Err(ContentError::Empty);
            }
            if length > file_length {
                return Err(ContentError::InvalidRange {
                    low: 0,
                    high: length - 1,
                    file_length,
                });
            }
            return Ok(Range::new(0, length - 1));
        }

        Ok(whole_file)
    }

    /// Writes the next body chunk.
    ///
    /// The remaining expected range is advanced by every byte written, so
    /// finishing early only releases what was really left.
    ///
    /// # Errors
    ///
    /// - `ContentError::NotInitialized` - Called before `initialize`
    /// - `ContentError::Finished` - Called after `finished`
    /// - `ContentError::Overrun` - Chunk reaches past the expected range; the fitting prefix is kept
    /// - `ContentError::Swarm` - Writing or bookkeeping failed
    pub async fn content_available(&mut self, data: Bytes) -> Result<usize, ContentError> {
        if self.finished {
            return Err(ContentError::Finished);
        }
        if !self.initialized {
            return Err(ContentError::NotInitialized);
        }

        let mut consumed = 0usize;
        while consumed < data.len() {
            let Some(expected) = self.expected else {
                return Err(ContentError::Overrun {
                    surplus: data.len() - consumed,
                });
            };

            if self.write_job.is_none() {
                let job = self
                    .coordinator
                    .new_write_job(expected.low(), Arc::clone(&self.storage))?;
                self.write_job = Some(job);
            }
            let Some(job) = self.write_job.as_mut() else {
                break;
            };

            let room = usize::try_from(expected.length()).unwrap_or(usize::MAX);
            let end = data.len().min(consumed.saturating_add(room));
            let written = job.write(&data[consumed..end]).await?;
            if written == 0 {
                break;
            }

            consumed += written;
            self.expected = if written as u64 >= expected.length() {
                None
            } else {
                Some(Range::new(expected.low() + written as u64, expected.high()))
            };
        }

        Ok(consumed)
    }

    /// Whether every expected byte has been written.
    pub fn is_satisfied(&self) -> bool {
        self.initialized && self.expected.is_none()
    }

    /// Ends the listener, releasing any unconsumed part of its lease.
    ///
    /// Safe to call repeatedly and before `initialize`.
    pub fn finished(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        // A write cancelled while verifying has already committed its chunk
        let mut committed = None;
        if let Some(mut job) = self.write_job.take() {
            job.close();
            committed = Some(job.cursor());
        }
        let remaining = self.expected.take().and_then(|range| match committed {
            Some(cursor) if cursor > range.low() => {
                (cursor <= range.high()).then(|| Range::new(cursor, range.high()))
            }
            _ => Some(range),
        });
        if let Some(range) = remaining {
            match self.coordinator.unlease(range) {
                Ok(()) => tracing::trace!("Listener released {}", range),
                Err(e) => tracing::warn!("Listener could not release {}: {}", range, e),
            }
        }
    }
}

impl Drop for ContentListener {
    fn drop(&mut self) {
        self.finished();
    }
}
