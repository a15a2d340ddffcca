//! How a simulated source answers requests.

/// Behavior of one simulated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceBehavior {
    /// Serves exactly what was asked for
    #[default]
    Honest,
    /// Serves at most `max_bytes` from the start of each requested range
    ShortResponse { max_bytes: u64 },
    /// Answers with a Content-Range whose bounds are reversed
    InvertedRange,
    /// Announces the full range but closes after `after` body bytes
    Truncating { after: u64 },
    /// Refuses every connection
    Refusing,
    /// Answers every request with this status and no body
    ErrorStatus(u16),
    /// Answers `200` with the whole file regardless of the Range header
    IgnoresRanges,
    /// Sends `extra` bytes past the announced range
    Overrunning { extra: u64 },
    /// Serves the requested range with every byte flipped
    Corrupt,
}

impl SourceBehavior {
    /// Whether connections stay open after a response.
    pub fn keeps_alive(&self) -> bool {
        match self {
            SourceBehavior::Honest
            | SourceBehavior::ShortResponse { .. }
            | SourceBehavior::InvertedRange
            | SourceBehavior::IgnoresRanges => true,
            SourceBehavior::Truncating { .. }
            | SourceBehavior::Refusing
            | SourceBehavior::ErrorStatus(_)
            | SourceBehavior::Overrunning { .. }
            | SourceBehavior::Corrupt => false,
        }
    }
}
