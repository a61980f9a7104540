#![allow(dead_code)]

use crabsignal::bus::BusEvent;
use crabsignal::errors::ErrorKind;
use crabsignal::signaling::{
    encode_signal, LocalAction, Notice, OrchestratorSettings, SignalMessage, SignalPayload,
    SignalingOrchestrator,
};
use crabsignal::testing::{MockPeer, MockPeerFactory, Published, RecordingBus, ScriptedCallApi};
use crabsignal::webrtc::{IceCandidate, SessionDescription};
use crabsignal::CallStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const CALL_CHANNEL: &str = "/user/queue/call";
pub const SIGNAL_CHANNEL: &str = "/user/queue/webrtc";

pub struct Harness {
    pub orch: SignalingOrchestrator,
    pub notices: mpsc::UnboundedReceiver<Notice>,
    pub bus: Arc<RecordingBus>,
    pub peers: Arc<MockPeerFactory>,
    pub calls: Arc<ScriptedCallApi>,
}

impl Harness {
    pub async fn new(local_id: &str) -> Self {
        Self::with_peers(local_id, MockPeerFactory::new()).await
    }

    pub async fn with_peers(local_id: &str, peers: Arc<MockPeerFactory>) -> Self {
        let bus = Arc::new(RecordingBus::new());
        let calls = Arc::new(ScriptedCallApi::new());
        let (mut orch, notices) = SignalingOrchestrator::new(
            OrchestratorSettings::new(local_id),
            bus.clone(),
            calls.clone(),
            peers.clone(),
        );
        orch.start().await.unwrap();
        Self {
            orch,
            notices,
            bus,
            peers,
            calls,
        }
    }

    /// Delivers a call-channel notification and lets all resulting work finish.
    pub async fn notify(&mut self, notification: Value) {
        self.deliver(CALL_CHANNEL, notification.to_string()).await;
    }

    pub async fn signal(&mut self, msg: SignalMessage) {
        self.deliver(SIGNAL_CHANNEL, encode_signal(&msg).unwrap()).await;
    }

    pub async fn deliver(&mut self, destination: &str, body: String) {
        self.orch
            .handle_bus_event(BusEvent::Message {
                destination: destination.to_string(),
                body,
            })
            .await;
        self.orch.settle().await;
    }

    pub async fn act(&mut self, action: LocalAction) {
        self.orch.perform(action).await;
        self.orch.settle().await;
    }

    /// Caller side: creates a call to `peer` and starts the offer.
    pub async fn call_and_offer(&mut self, peer: &str) -> String {
        self.act(LocalAction::CreateCall {
            target: peer.to_string(),
            category: None,
        })
        .await;
        self.act(LocalAction::StartOffer).await;
        self.orch.call().unwrap().call_id.clone()
    }

    pub async fn incoming(&mut self, call_id: &str, from: Option<&str>) {
        let mut body = json!({"type": "INCOMING_CALL", "callId": call_id});
        if let Some(from) = from {
            body["fromUserId"] = json!(from);
        }
        self.notify(body).await;
    }

    pub fn status(&self) -> Option<CallStatus> {
        self.orch.call().map(|c| c.status)
    }

    pub fn peer(&self) -> Arc<MockPeer> {
        self.peers.last().expect("no peer created yet")
    }

    pub fn published(&self, name: &str) -> Vec<Published> {
        self.bus.published_to(&format!("/app/{name}"))
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(n) = self.notices.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn error_kinds(&mut self) -> Vec<ErrorKind> {
        self.drain_notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Error { kind, .. } => Some(kind),
                _ => None,
            })
            .collect()
    }
}

pub fn offer(call_id: &str, from: &str, to: &str) -> SignalMessage {
    SignalMessage {
        call_id: call_id.to_string(),
        from_id: from.to_string(),
        to_id: to.to_string(),
        payload: SignalPayload::Offer(SessionDescription::offer("v=0\r\no=- 9 1 IN IP4 10.0.0.9\r\n")),
    }
}

pub fn answer(call_id: &str, from: &str, to: &str) -> SignalMessage {
    SignalMessage {
        call_id: call_id.to_string(),
        from_id: from.to_string(),
        to_id: to.to_string(),
        payload: SignalPayload::Answer(SessionDescription::answer("v=0\r\no=- 10 1 IN IP4 10.0.0.9\r\n")),
    }
}

pub fn candidate(call_id: &str, from: &str, to: &str, line: &str) -> SignalMessage {
    SignalMessage {
        call_id: call_id.to_string(),
        from_id: from.to_string(),
        to_id: to.to_string(),
        payload: SignalPayload::IceCandidate(IceCandidate::new(line)),
    }
}
