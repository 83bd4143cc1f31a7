// Error types for the network-change monitor

use std::io;

use thiserror::Error;

use crate::iface::types::EventClass;

/// Errors that end (or prevent) a monitoring session, plus the one
/// per-event condition the dispatcher recovers from locally.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The configured interest mask is not one of the seven non-empty
    /// subsets of {link, address, route}.
    #[error("invalid interest mask {0}: expected a value between 1 and 7")]
    InvalidInterestMask(u8),

    /// A kernel subscription could not be established.
    #[error("failed to subscribe to {class} events: {source}")]
    Subscribe {
        class: EventClass,
        #[source]
        source: io::Error,
    },

    /// The initial interface enumeration failed.
    #[error("failed to enumerate network interfaces: {0}")]
    Enumerate(#[source] io::Error),

    /// An interface index no longer maps to a live interface.
    #[error("no interface with index {0}")]
    UnknownInterface(u32),

    /// The cancel signal could not be created or fired.
    #[error("cancel signal error: {0}")]
    Cancel(#[source] io::Error),

    /// The consumer side of the change signal channel is gone.
    #[error("change signal consumer disconnected")]
    SinkClosed,

    /// A subscription stream ended while the session was running.
    #[error("{0} event stream closed unexpectedly")]
    StreamClosed(EventClass),
}

impl MonitorError {
    /// Create a subscription error for the given class.
    pub fn subscribe(class: EventClass, source: io::Error) -> Self {
        Self::Subscribe { class, source }
    }
}
