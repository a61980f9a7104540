//! Signaling core: wire codec, per-session work queue and the orchestrator
//! that ties call lifecycle, peer sessions and the message bus together.

pub mod codec;
pub mod orchestrator;
pub mod worker;

pub use codec::{
    decode_command, decode_notification, decode_signal, encode_command, encode_notification,
    encode_signal, peek_call_id, CallCommand, CallNotification, Destination, SignalKind,
    SignalMessage, SignalPayload,
};
pub use orchestrator::{
    LocalAction, Notice, OrchestratorSettings, OrchestratorSnapshot, SignalingOrchestrator,
};
pub use worker::{SessionHandle, SessionOp, SessionOutput, SessionReport};
