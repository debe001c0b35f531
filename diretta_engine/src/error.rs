//! Engine error surface.

use std::fmt;

use crate::state::EngineState;

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stage of the open protocol at which a retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    SetSink,
    ConnectPrepare,
    Connect,
    ConnectWait,
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenStage::SetSink => write!(f, "sink assignment"),
            OpenStage::ConnectPrepare => write!(f, "connect preparation"),
            OpenStage::Connect => write!(f, "connect"),
            OpenStage::ConnectWait => write!(f, "connect wait"),
        }
    }
}

/// Errors surfaced by [`SyncEngine`](crate::engine::SyncEngine) operations.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("engine is not enabled")]
    NotEnabled,

    #[error("enable failed: {0}")]
    EnableFailed(String),

    #[error("no reachable target")]
    NoTarget,

    #[error("sink rejected every candidate wire format")]
    FormatUnsupported,

    #[error("open failed during {stage}")]
    OpenFailed { stage: OpenStage },

    #[error("operation not valid in state {0:?}")]
    InvalidState(EngineState),

    #[error("transport error: {0}")]
    Transport(String),
}
