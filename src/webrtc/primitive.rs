//! The peer-connection primitive the signaling core negotiates against.
//!
//! Every operation is asynchronous and may fail on its own. Events raised by
//! the primitive (gathered candidates, connection state, data channel
//! traffic) are pushed into a [`PeerEventSink`] that carries the generation of
//! the session owning the connection, so events from a replaced connection can
//! be told apart from the live one.

use crate::errors::SignalResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP session description as carried in the `sdp` field of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as carried in the `candidate` field of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    DataChannelOpen(String),
    DataMessage(String),
    DataChannelClosed(String),
}

/// Generation-tagged event as delivered to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedPeerEvent {
    pub generation: u64,
    pub event: PeerEvent,
}

#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        // The receiver is gone once the orchestrator shuts down; late events are moot.
        let _ = self.tx.send(TaggedPeerEvent {
            generation: self.generation,
            event,
        });
    }
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_data_channel(&self, label: &str) -> SignalResult<()>;
    async fn create_offer(&self) -> SignalResult<SessionDescription>;
    async fn create_answer(&self) -> SignalResult<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> SignalResult<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()>;
    async fn send_text(&self, text: &str) -> SignalResult<()>;
    async fn close(&self) -> SignalResult<()>;
}

/// Builds one primitive per call.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, sink: PeerEventSink) -> SignalResult<Arc<dyn PeerConnector>>;
}
