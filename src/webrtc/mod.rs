//! Peer-connection side of a call: the primitive abstraction, its `webrtc`
//! crate implementation, the ICE candidate buffer and the per-call session.

pub mod ice_buffer;
pub mod peer;
pub mod primitive;
pub mod session;

pub use ice_buffer::{Admit, IceBuffer};
pub use peer::{RtcSettings, WebRtcPeer, WebRtcPeerFactory};
pub use primitive::{
    ConnectionState, IceCandidate, PeerConnector, PeerEvent, PeerEventSink, PeerFactory, SdpType,
    SessionDescription, TaggedPeerEvent,
};
pub use session::{CandidateOutcome, CloseHandle, NegotiationState, PeerSession};
