//! Destination files and their place in the aggregate byte space.

use super::SwarmError;
use crate::range::Range;

/// One destination file occupying `[start, end]` of the aggregate download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwarmFile {
    path: String,
    start: u64,
    end: u64,
}

impl SwarmFile {
    /// Relative `/`-separated path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First aggregate byte owned by this file.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last aggregate byte owned by this file.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// File size in bytes.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Aggregate range covered by the file.
    pub fn range(&self) -> Range {
        Range::new(self.start, self.end)
    }

    /// Translates an aggregate range into file-relative coordinates.
    ///
    /// Returns `None` if the range is not entirely inside this file.
    pub fn to_relative(&self, range: &Range) -> Option<Range> {
        if !self.range().contains(range) {
            return None;
        }
        range.shift_down(self.start).ok()
    }

    /// Translates a file-relative range into aggregate coordinates.
    ///
    /// Returns `None` if the range reaches past the end of the file.
    pub fn to_aggregate(&self, relative: &Range) -> Option<Range> {
        if relative.high() >= self.length() {
            return None;
        }
        relative.shift_up(self.start).ok()
    }
}

/// Ordered set of [`SwarmFile`]s partitioning `[0, total_size - 1]`.
///
/// Files are laid out back to back in the order given, so the partition
/// holds by construction: no gaps, no overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmFileSystem {
    files: Vec<SwarmFile>,
    total_size: u64,
}

impl SwarmFileSystem {
    /// Lays out files back to back from `(path, length)` pairs.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidLayout` - No files, zero-length or unsafe path, duplicate path, or size overflow
    pub fn new<I, P>(entries: I) -> Result<Self, SwarmError>
    where
        I: IntoIterator<Item = (P, u64)>,
        P: Into<String>,
    {
        let mut files: Vec<SwarmFile> = Vec::new();
        let mut offset = 0u64;

        for (path, length) in entries {
            let path = path.into();
            validate_path(&path)?;

            if length == 0 {
                return Err(SwarmError::InvalidLayout {
                    reason: format!("file {path} has zero length"),
                });
            }
            if files.iter().any(|f| f.path == path) {
                return Err(SwarmError::InvalidLayout {
                    reason: format!("duplicate file path {path}"),
                });
            }

            let end = offset
                .checked_add(length - 1)
                .ok_or_else(|| SwarmError::InvalidLayout {
                    reason: "total size overflows".to_string(),
                })?;
            files.push(SwarmFile {
                path,
                start: offset,
                end,
            });
            offset = end.checked_add(1).ok_or_else(|| SwarmError::InvalidLayout {
                reason: "total size overflows".to_string(),
            })?;
        }

        if files.is_empty() {
            return Err(SwarmError::InvalidLayout {
                reason: "download has no files".to_string(),
            });
        }

        Ok(Self {
            files,
            total_size: offset,
        })
    }

    /// Layout with a single file.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidLayout` - Zero length or unsafe path
    pub fn single(path: impl Into<String>, length: u64) -> Result<Self, SwarmError> {
        Self::new([(path.into(), length)])
    }

    /// Total aggregate size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The whole aggregate byte space.
    pub fn full_range(&self) -> Range {
        Range::new(0, self.total_size - 1)
    }

    /// Files in aggregate order.
    pub fn files(&self) -> &[SwarmFile] {
        &self.files
    }

    /// File owning the aggregate `offset`.
    pub fn file_at(&self, offset: u64) -> Option<&SwarmFile> {
        let index = self.files.partition_point(|f| f.end < offset);
        self.files.get(index).filter(|f| f.start <= offset)
    }

    /// Splits an aggregate range into per-file pieces with relative ranges.
    pub fn split(&self, range: &Range) -> Vec<(&SwarmFile, Range)> {
        let start = self.files.partition_point(|f| f.end < range.low());
        self.files[start..]
            .iter()
            .take_while(|f| f.start <= range.high())
            .filter_map(|f| {
                let shared = f.range().intersect(range)?;
                Some((f, f.to_relative(&shared)?))
            })
            .collect()
    }
}

fn validate_path(path: &str) -> Result<(), SwarmError> {
    let unsafe_segment = path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if unsafe_segment || path.contains('\\') {
        return Err(SwarmError::InvalidLayout {
            reason: format!("unsafe file path {path:?}"),
        });
    }
    Ok(())
}
