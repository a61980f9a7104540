use super::harness::*;
use crabsignal::errors::ErrorKind;
use crabsignal::signaling::LocalAction;
use crabsignal::testing::PeerCall;
use crabsignal::webrtc::{NegotiationState, PeerEvent, SdpType};
use crabsignal::{CallStatus, Notice};
use serde_json::json;

#[tokio::test]
async fn end_is_idempotent() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;

    h.act(LocalAction::End).await;
    assert_eq!(h.status(), Some(CallStatus::Ended));
    h.act(LocalAction::End).await;
    assert_eq!(h.status(), Some(CallStatus::Ended));

    assert_eq!(h.peer().close_count(), 1);
    let ends = h.published("call.end");
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].json(), json!({"callId": "c1"}));
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Closed));
}

#[tokio::test]
async fn remote_end_then_local_end_closes_once() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(offer("c1", "alice", "bob")).await;

    h.notify(json!({"type": "CALL_ENDED", "callId": "c1"})).await;
    assert_eq!(h.status(), Some(CallStatus::Ended));
    h.act(LocalAction::End).await;

    assert_eq!(h.peer().close_count(), 1);
    assert!(h.published("call.end").is_empty());
}

#[tokio::test]
async fn accept_after_end_fails() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.act(LocalAction::End).await;
    h.drain_notices();

    h.act(LocalAction::Accept).await;
    assert_eq!(h.error_kinds(), vec![ErrorKind::InvalidTransition]);
    assert_eq!(h.status(), Some(CallStatus::Ended));
    assert!(h.published("call.accept").is_empty());
}

#[tokio::test]
async fn accept_publishes_command() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.act(LocalAction::Accept).await;

    assert_eq!(h.status(), Some(CallStatus::Accepted));
    let accepts = h.published("call.accept");
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0].json(), json!({"callId": "c1"}));
}

#[tokio::test]
async fn reject_publishes_reason_and_closes_session() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(candidate("c1", "alice", "bob", "candidate:1")).await;

    h.act(LocalAction::Reject {
        reason: Some("busy".to_string()),
    })
    .await;

    assert_eq!(h.status(), Some(CallStatus::Rejected));
    assert_eq!(h.orch.call().unwrap().reject_reason.as_deref(), Some("busy"));
    assert_eq!(h.published("call.reject")[0].json(), json!({"callId": "c1", "reason": "busy"}));
    assert_eq!(h.peer().calls(), vec![PeerCall::Close]);
}

#[tokio::test]
async fn remote_rejection_closes_session() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;

    h.notify(json!({"type": "CALL_REJECTED", "callId": "c1", "reason": "declined"}))
        .await;
    assert_eq!(h.status(), Some(CallStatus::Rejected));
    assert_eq!(h.peer().close_count(), 1);

    // Ending a rejected call is a no-op.
    h.act(LocalAction::End).await;
    assert!(h.published("call.end").is_empty());
}

#[tokio::test]
async fn second_call_while_live_is_refused() {
    let mut h = Harness::new("alice").await;
    h.act(LocalAction::CreateCall {
        target: "p".to_string(),
        category: Some("AUDIO".to_string()),
    })
    .await;
    h.drain_notices();

    h.act(LocalAction::CreateCall {
        target: "q".to_string(),
        category: None,
    })
    .await;

    assert_eq!(h.error_kinds(), vec![ErrorKind::InvalidTransition]);
    assert_eq!(h.calls.requests(), vec![("p".to_string(), "AUDIO".to_string())]);
    assert_eq!(h.orch.call().unwrap().call_id, "c1");
}

#[tokio::test]
async fn incoming_call_while_live_is_refused() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.drain_notices();

    h.incoming("c2", Some("carol")).await;
    assert_eq!(h.error_kinds(), vec![ErrorKind::InvalidTransition]);
    assert_eq!(h.orch.call().unwrap().call_id, "c1");
}

#[tokio::test]
async fn new_call_gets_a_fresh_session() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;
    h.act(LocalAction::End).await;
    let first = h.peer();

    let second_id = h.call_and_offer("q").await;
    assert_eq!(second_id, "c2");
    assert_eq!(h.peers.created(), 2);
    assert_eq!(first.close_count(), 1);

    // Late events from the first connection are ignored.
    first.emit(PeerEvent::LocalCandidate(crabsignal::webrtc::IceCandidate::new("candidate:stale")));
    h.orch.settle().await;
    assert!(h.published("webrtc.ice").is_empty());
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::LocalOffered));
}

#[tokio::test]
async fn end_discards_stalled_negotiation() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    let gate = h.peers.stall_next("set_remote_description");

    h.orch
        .handle_bus_event(crabsignal::BusEvent::Message {
            destination: SIGNAL_CHANNEL.to_string(),
            body: crabsignal::signaling::encode_signal(&offer("c1", "alice", "bob")).unwrap(),
        })
        .await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    h.orch.perform(LocalAction::End).await;
    gate.notify_one();
    h.orch.settle().await;

    let peer = h.peer();
    assert!(peer.calls().contains(&PeerCall::SetRemote(SdpType::Offer)));
    assert!(!peer.calls().contains(&PeerCall::CreateAnswer));
    assert_eq!(peer.close_count(), 1);
    assert!(h.published("webrtc.answer").is_empty());
    assert_eq!(h.published("call.end").len(), 1);
    assert_eq!(h.status(), Some(CallStatus::Ended));
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Closed));
    assert!(!h
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::Error { .. })));
}

#[tokio::test]
async fn notification_for_other_call_is_ignored() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.drain_notices();

    h.notify(json!({"type": "CALL_ENDED", "callId": "c2"})).await;
    h.notify(json!({"type": "CALL_ACCEPTED", "callId": "c2"})).await;

    assert_eq!(h.status(), Some(CallStatus::Created));
    assert!(h.drain_notices().is_empty());
}
