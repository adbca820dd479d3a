use crate::deferred::Closed;
use crate::serialized_error::RemoteError;
use crate::server::ContinuationKind;
use std::time::Duration;

/// A peer or transport broke the protocol. Not recoverable locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    #[error("missing listener for id: {id}")]
    UnknownResponse { id: String },

    #[error("no continuation registered for id: {id}")]
    UnknownContinuation { id: String },

    #[error("invalid sub-request {requested} for {registered} continuation {id}")]
    KindMismatch {
        id: String,
        requested: String,
        registered: ContinuationKind,
    },

    #[error("callback {id} was already consumed")]
    ContinuationConsumed { id: String },

    #[error("continuation {id} belongs to another session")]
    SessionMismatch { id: String },

    #[error("malformed serialized error: {reason}")]
    MalformedFault { reason: String },
}

impl ProtocolViolation {
    pub fn malformed(reason: impl ToString) -> Self {
        Self::Malformed {
            reason: reason.to_string(),
        }
    }
}

/// Why a call made through a [`crate::ClientProxy`] did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("bridge closed before the call settled")]
    Closed,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("expected a {expected} result, got {got}")]
    UnexpectedShape {
        expected: &'static str,
        got: &'static str,
    },

    #[error("payload conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Closed> for CallError {
    fn from(_: Closed) -> Self {
        CallError::Closed
    }
}

impl CallError {
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(err) => Some(err),
            _ => None,
        }
    }
}
