//! Source lifecycle events and reconnection policy.
//!
//! Downloaders report what happened to their source; a [`SourcePolicy`]
//! decides what to do about it once a connection attempt has ended.

use std::sync::Arc;

use super::{SourceId, SwarmSource};

/// Coarse class of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn from_code(code: u16) -> Self {
        match code {
            200..=299 => StatusClass::Success,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }
}

/// Status of one processed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatus {
    pub code: u16,
    pub class: StatusClass,
}

impl SourceStatus {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            class: StatusClass::from_code(code),
        }
    }

    /// Whether the response carried content: 200 or 206.
    pub fn delivers_content(&self) -> bool {
        self.code == 200 || self.code == 206
    }
}

/// Notifications a downloader emits about its source.
///
/// Every connection attempt ends with exactly one terminal event:
/// `ConnectFailed` or `ConnectionClosed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Connected,
    ConnectFailed { reason: String },
    ResponseProcessed { status: SourceStatus },
    /// A response was accepted and fully written
    ContentDelivered { bytes: u64 },
    ConnectionClosed,
    /// The source has nothing more to contribute
    Finished,
}

impl SourceEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceEvent::ConnectFailed { .. } | SourceEvent::ConnectionClosed
        )
    }
}

/// A [`SourceEvent`] tagged with the source it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceNotification {
    pub source: SourceId,
    pub event: SourceEvent,
}

/// Per-source bookkeeping the engine keeps across reconnects.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub source: Arc<SwarmSource>,
    pub last_status: Option<SourceStatus>,
    /// Reconnects since the source last delivered content
    pub reconnects: u32,
    pub connected: bool,
    pub responses: u64,
    pub delivered: u64,
}

impl SourceContext {
    pub fn new(source: Arc<SwarmSource>) -> Self {
        Self {
            source,
            last_status: None,
            reconnects: 0,
            connected: false,
            responses: 0,
            delivered: 0,
        }
    }

    /// Folds an event into the context.
    pub fn record(&mut self, event: &SourceEvent) {
        match event {
            SourceEvent::Connected => self.connected = true,
            SourceEvent::ConnectFailed { .. } | SourceEvent::ConnectionClosed => {
                self.connected = false;
            }
            SourceEvent::ResponseProcessed { status } => {
                self.last_status = Some(*status);
                self.responses += 1;
            }
            SourceEvent::ContentDelivered { bytes } => {
                self.delivered += bytes;
                self.reconnects = 0;
            }
            SourceEvent::Finished => {}
        }
    }
}

/// What the engine should do with a source after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Nothing to decide yet
    Continue,
    /// Start another connection attempt
    Readd,
    /// Forget the source
    Drop,
}

/// Decides whether sources are retried.
pub trait SourcePolicy: Send + Sync {
    /// Called after `context` has recorded `event`.
    fn on_event(&self, context: &SourceContext, event: &SourceEvent) -> PolicyAction;
}

/// Re-adds a source whose connection closed after a healthy response.
///
/// Sources that failed to connect, answered with an error status or were
/// marked finished are dropped. So are sources that reconnected
/// `max_reconnects` times in a row without delivering content.
#[derive(Debug, Clone)]
pub struct ReconnectingPolicy {
    max_reconnects: u32,
}

impl ReconnectingPolicy {
    pub fn new(max_reconnects: u32) -> Self {
        Self { max_reconnects }
    }
}

impl SourcePolicy for ReconnectingPolicy {
    fn on_event(&self, context: &SourceContext, event: &SourceEvent) -> PolicyAction {
        match event {
            SourceEvent::ConnectFailed { .. } => PolicyAction::Drop,
            SourceEvent::ConnectionClosed => {
                let healthy = context
                    .last_status
                    .is_some_and(|status| status.delivers_content());
                if healthy
                    && !context.source.is_finished()
                    && context.reconnects < self.max_reconnects
                {
                    PolicyAction::Readd
                } else {
                    PolicyAction::Drop
                }
            }
            _ => PolicyAction::Continue,
        }
    }
}
