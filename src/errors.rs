use crate::call::{CallAction, CallStatus};
use thiserror::Error;

pub type SignalResult<T> = Result<T, SignalError>;

/// Flat classification of [`SignalError`] used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidTransition,
    CallIdMismatch,
    CandidateApplyFailure,
    NegotiationFailure,
    SessionClosed,
    UnknownPeer,
    Transport,
    Codec,
    CallApi,
    Config,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("cannot {action} a call that is {status}")]
    InvalidTransition { status: CallStatus, action: CallAction },
    #[error("call {call_id} is still in progress")]
    CallInProgress { call_id: String },
    #[error("no active call")]
    NoActiveCall,
    #[error("message for call {received} does not match active call {}", .active.as_deref().unwrap_or("<none>"))]
    CallIdMismatch {
        active: Option<String>,
        received: String,
    },
    #[error("ICE candidate rejected: {0}")]
    CandidateApplyFailure(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),
    #[error("peer session is closed")]
    SessionClosed,
    #[error("peer identity for call {call_id} is unknown")]
    UnknownPeer { call_id: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("call API error: {0}")]
    CallApi(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl SignalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalError::InvalidTransition { .. }
            | SignalError::CallInProgress { .. }
            | SignalError::NoActiveCall => ErrorKind::InvalidTransition,
            SignalError::CallIdMismatch { .. } => ErrorKind::CallIdMismatch,
            SignalError::CandidateApplyFailure(_) => ErrorKind::CandidateApplyFailure,
            SignalError::NegotiationFailure(_) => ErrorKind::NegotiationFailure,
            SignalError::SessionClosed => ErrorKind::SessionClosed,
            SignalError::UnknownPeer { .. } => ErrorKind::UnknownPeer,
            SignalError::Transport(_) => ErrorKind::Transport,
            SignalError::Codec(_) => ErrorKind::Codec,
            SignalError::CallApi(_) => ErrorKind::CallApi,
            SignalError::Config(_) => ErrorKind::Config,
        }
    }

    /// Errors that are dropped without surfacing anything to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CallIdMismatch | ErrorKind::UnknownPeer | ErrorKind::SessionClosed
        )
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(e: serde_json::Error) -> Self {
        SignalError::Codec(e.to_string())
    }
}
