//! JSON wire format for everything that crosses the message bus.

use crate::errors::{SignalError, SignalResult};
use crate::webrtc::primitive::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application destinations the orchestrator publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    CallAccept,
    CallReject,
    CallEnd,
    WebrtcOffer,
    WebrtcAnswer,
    WebrtcIce,
}

impl Destination {
    pub fn name(self) -> &'static str {
        match self {
            Destination::CallAccept => "call.accept",
            Destination::CallReject => "call.reject",
            Destination::CallEnd => "call.end",
            Destination::WebrtcOffer => "webrtc.offer",
            Destination::WebrtcAnswer => "webrtc.answer",
            Destination::WebrtcIce => "webrtc.ice",
        }
    }

    /// Full path under the application prefix, e.g. `/app/webrtc.offer`.
    pub fn path(self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Destination::CallAccept,
            Destination::CallReject,
            Destination::CallEnd,
            Destination::WebrtcOffer,
            Destination::WebrtcAnswer,
            Destination::WebrtcIce,
        ]
        .into_iter()
        .find(|d| d.name() == name)
    }

    pub fn for_payload(payload: &SignalPayload) -> Self {
        match payload {
            SignalPayload::Offer(_) => Destination::WebrtcOffer,
            SignalPayload::Answer(_) => Destination::WebrtcAnswer,
            SignalPayload::IceCandidate(_) => Destination::WebrtcIce,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Offer(_) => SignalKind::Offer,
            SignalPayload::Answer(_) => SignalKind::Answer,
            SignalPayload::IceCandidate(_) => SignalKind::IceCandidate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub call_id: String,
    pub from_id: String,
    pub to_id: String,
    pub payload: SignalPayload,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignal {
    #[serde(rename = "type")]
    kind: SignalKind,
    call_id: String,
    from_user_id: String,
    to_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
}

pub fn encode_signal(msg: &SignalMessage) -> SignalResult<String> {
    let (sdp, candidate) = match &msg.payload {
        SignalPayload::Offer(d) | SignalPayload::Answer(d) => (Some(d.clone()), None),
        SignalPayload::IceCandidate(c) => (None, Some(c.clone())),
    };
    let wire = WireSignal {
        kind: msg.payload.kind(),
        call_id: msg.call_id.clone(),
        from_user_id: msg.from_id.clone(),
        to_user_id: msg.to_id.clone(),
        sdp,
        candidate,
    };
    Ok(serde_json::to_string(&wire)?)
}

pub fn decode_signal(body: &str) -> SignalResult<SignalMessage> {
    let wire: WireSignal = serde_json::from_str(body)?;
    let payload = match wire.kind {
        SignalKind::Offer => SignalPayload::Offer(require(wire.sdp, "OFFER", "sdp")?),
        SignalKind::Answer => SignalPayload::Answer(require(wire.sdp, "ANSWER", "sdp")?),
        SignalKind::IceCandidate => {
            SignalPayload::IceCandidate(require(wire.candidate, "ICE_CANDIDATE", "candidate")?)
        }
    };
    Ok(SignalMessage {
        call_id: wire.call_id,
        from_id: wire.from_user_id,
        to_id: wire.to_user_id,
        payload,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallIdOnly {
    call_id: String,
}

/// Reads just the `callId` of a signal frame, so frames for other calls can be
/// dropped without decoding the rest.
pub fn peek_call_id(body: &str) -> Option<String> {
    serde_json::from_str::<CallIdOnly>(body).ok().map(|c| c.call_id)
}

fn require<T>(value: Option<T>, kind: &str, field: &str) -> SignalResult<T> {
    value.ok_or_else(|| SignalError::Codec(format!("{kind} without {field}")))
}

/// Call lifecycle notifications delivered on the per-identity call channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallNotification {
    IncomingCall {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "fromUserId", default, skip_serializing_if = "Option::is_none")]
        from_id: Option<String>,
    },
    CallAccepted {
        #[serde(rename = "callId")]
        call_id: String,
    },
    CallRejected {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CallEnded {
        #[serde(rename = "callId")]
        call_id: String,
    },
}

impl CallNotification {
    pub fn call_id(&self) -> &str {
        match self {
            CallNotification::IncomingCall { call_id, .. }
            | CallNotification::CallAccepted { call_id }
            | CallNotification::CallRejected { call_id, .. }
            | CallNotification::CallEnded { call_id } => call_id,
        }
    }
}

pub fn encode_notification(n: &CallNotification) -> SignalResult<String> {
    Ok(serde_json::to_string(n)?)
}

pub fn decode_notification(body: &str) -> SignalResult<CallNotification> {
    Ok(serde_json::from_str(body)?)
}

/// Body of `call.accept`, `call.reject` and `call.end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCommand {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn encode_command(cmd: &CallCommand) -> SignalResult<String> {
    Ok(serde_json::to_string(cmd)?)
}

pub fn decode_command(body: &str) -> SignalResult<CallCommand> {
    Ok(serde_json::from_str(body)?)
}
