//! Testing utilities for crabsignal
//!
//! Deterministic stand-ins for the external collaborators, so the signaling
//! core can be exercised offline: a peer-connection primitive that records
//! every call in order, a message bus that records every publish and a call
//! API with preset call ids.

pub mod call_api;
pub mod mock_peer;
pub mod recording_bus;

pub use call_api::ScriptedCallApi;
pub use mock_peer::{MockPeer, MockPeerFactory, PeerCall};
pub use recording_bus::{Published, RecordingBus};
