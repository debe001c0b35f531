//! Error types for link-level operations.

use std::fmt;

/// Error codes for discovery, negotiation and transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkError {
    /// The vendor finder could not be opened.
    FinderOpenFailed,
    /// Discovery completed but no target was reachable.
    NoTargetsFound,
    /// The sink rejected a control primitive or sink assignment.
    SinkRejected,
    /// No candidate wire format was accepted by the sink.
    FormatUnsupported,
    /// The transport is not open.
    TransportClosed,
    /// A bounded wait elapsed before the peer responded.
    Timeout,
    /// I/O error on the link.
    IoError,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::FinderOpenFailed => write!(f, "finder open failed"),
            LinkError::NoTargetsFound => write!(f, "no targets found"),
            LinkError::SinkRejected => write!(f, "sink rejected the request"),
            LinkError::FormatUnsupported => write!(f, "no accepted wire format"),
            LinkError::TransportClosed => write!(f, "transport is closed"),
            LinkError::Timeout => write!(f, "link timeout"),
            LinkError::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<std::io::Error> for LinkError {
    fn from(_: std::io::Error) -> Self {
        LinkError::IoError
    }
}

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
