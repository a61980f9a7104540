//! CrabSignal: call signaling and WebRTC negotiation harness
//!
//! This crate drives one side of a two-party call against a signaling
//! backend: it follows the call lifecycle (create, accept or reject, end),
//! negotiates a peer connection with offer/answer/ICE messages over a STOMP
//! message bus and opens a data channel once connected.
//!
//! # Features
//! - Call lifecycle state machine with a single live call
//! - Per-call peer session with ICE candidate buffering until remote-ready
//! - Strictly ordered negotiation, cancellable by ending the call
//! - STOMP-over-WebSocket bus client and an in-process loopback backend
//! - Deterministic mock collaborators for tests
//!
//! # Usage
//! ```rust,ignore
//! use crabsignal::{HarnessConfig, OrchestratorSettings, SignalingOrchestrator};
//!
//! let config = HarnessConfig::load_or_default();
//! let (orchestrator, notices) = SignalingOrchestrator::new(
//!     OrchestratorSettings::from_config(&config),
//!     bus,
//!     call_api,
//!     peer_factory,
//! );
//! ```
pub mod api;
pub mod bus;
pub mod call;
pub mod commands;
pub mod config;
pub mod errors;
pub mod invariant;
pub mod signaling;
pub mod webrtc;

// Testing utilities - deterministic collaborators for offline testing
pub mod testing;

// Re-exports for convenience
pub use api::{CallApi, CreatedCall, HttpCallApi};
pub use bus::{BusEvent, LocalBus, LocalCallApi, LocalHub, MessageBus, StompBus};
pub use call::{CallLifecycle, CallRole, CallSession, CallStatus};
pub use config::HarnessConfig;
pub use errors::{ErrorKind, SignalError, SignalResult};
pub use signaling::{
    LocalAction, Notice, OrchestratorSettings, OrchestratorSnapshot, SignalingOrchestrator,
};
pub use webrtc::{NegotiationState, PeerSession, RtcSettings, WebRtcPeerFactory};

/// Initialize logging for the signaling harness
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabsignal=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
