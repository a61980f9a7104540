//! Peer-connection primitive backed by the `webrtc` crate.

use crate::config::{IceServerConfig, RtcConfig};
use crate::errors::{SignalError, SignalResult};
use crate::webrtc::primitive::{
    ConnectionState, IceCandidate, PeerConnector, PeerEvent, PeerEventSink, PeerFactory, SdpType,
    SessionDescription,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Peer connection settings taken from the `[rtc]` config section.
#[derive(Debug, Clone, Default)]
pub struct RtcSettings {
    pub ice_servers: Vec<IceServerConfig>,
}

impl From<&RtcConfig> for RtcSettings {
    fn from(config: &RtcConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
        }
    }
}

impl From<&IceServerConfig> for RTCIceServer {
    fn from(server: &IceServerConfig) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = SignalError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        parsed.map_err(|e| SignalError::NegotiationFailure(format!("invalid SDP: {}", e)))
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = SignalError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self, Self::Error> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(SignalError::NegotiationFailure(format!(
                    "unsupported description type {}",
                    other
                )))
            }
        };
        Ok(SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        })
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

fn failure(step: &str, e: impl std::fmt::Display) -> SignalError {
    SignalError::NegotiationFailure(format!("{} failed: {}", step, e))
}

/// Builds a fresh `RTCPeerConnection` for every call.
pub struct WebRtcPeerFactory {
    settings: RtcSettings,
}

impl WebRtcPeerFactory {
    pub fn new(settings: RtcSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, sink: PeerEventSink) -> SignalResult<Arc<dyn PeerConnector>> {
        let peer = WebRtcPeer::new(&self.settings, sink).await?;
        Ok(Arc::new(peer))
    }
}

/// One `RTCPeerConnection` and the data channel negotiated on it.
pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    sink: PeerEventSink,
}

impl WebRtcPeer {
    pub async fn new(settings: &RtcSettings, sink: PeerEventSink) -> SignalResult<Self> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: settings.ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| failure("create peer connection", e))?,
        );
        let data_channel = Arc::new(RwLock::new(None));

        let candidate_sink = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        log::debug!("gathered local candidate {}", init.candidate);
                        sink.emit(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => log::warn!("cannot serialize local candidate: {}", e),
                }
            })
        }));

        let state_sink = sink.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                state_sink.emit(PeerEvent::ConnectionState(state.into()));
                Box::pin(async {})
            },
        ));

        let channel_sink = sink.clone();
        let channel_slot = Arc::clone(&data_channel);
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let sink = channel_sink.clone();
            let slot = Arc::clone(&channel_slot);
            Box::pin(async move {
                log::info!("remote opened data channel '{}'", dc.label());
                wire_data_channel(&dc, &sink);
                *slot.write().await = Some(dc);
            })
        }));

        Ok(Self {
            peer_connection,
            data_channel,
            sink,
        })
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, sink: &PeerEventSink) {
    let label = dc.label().to_string();

    let open_sink = sink.clone();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        open_sink.emit(PeerEvent::DataChannelOpen(open_label));
        Box::pin(async {})
    }));

    let message_sink = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        message_sink.emit(PeerEvent::DataMessage(text));
        Box::pin(async {})
    }));

    let close_sink = sink.clone();
    dc.on_close(Box::new(move || {
        close_sink.emit(PeerEvent::DataChannelClosed(label.clone()));
        Box::pin(async {})
    }));
}

#[async_trait]
impl PeerConnector for WebRtcPeer {
    async fn create_data_channel(&self, label: &str) -> SignalResult<()> {
        log::info!("Creating data channel '{}'", label);

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| failure("create data channel", e))?;
        wire_data_channel(&dc, &self.sink);
        *self.data_channel.write().await = Some(dc);
        Ok(())
    }

    async fn create_offer(&self) -> SignalResult<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| failure("create offer", e))?;
        offer.try_into()
    }

    async fn create_answer(&self) -> SignalResult<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| failure("create answer", e))?;
        answer.try_into()
    }

    async fn set_local_description(&self, desc: SessionDescription) -> SignalResult<()> {
        let desc: RTCSessionDescription = desc.try_into()?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| failure("set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()> {
        let desc: RTCSessionDescription = desc.try_into()?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| failure("set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| SignalError::CandidateApplyFailure(e.to_string()))
    }

    async fn send_text(&self, text: &str) -> SignalResult<()> {
        let channel = self.data_channel.read().await;
        let Some(dc) = channel.as_ref() else {
            return Err(SignalError::Transport("no data channel".to_string()));
        };
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(SignalError::Transport(format!(
                "data channel '{}' is not open",
                dc.label()
            )));
        }
        dc.send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| SignalError::Transport(format!("data channel send failed: {}", e)))
    }

    async fn close(&self) -> SignalResult<()> {
        log::info!("Closing peer connection");
        if let Some(dc) = self.data_channel.write().await.take() {
            if let Err(e) = dc.close().await {
                log::debug!("data channel close: {}", e);
            }
        }
        self.peer_connection
            .close()
            .await
            .map_err(|e| SignalError::Transport(format!("close failed: {}", e)))
    }
}
