use super::harness::*;
use crabsignal::errors::ErrorKind;
use crabsignal::signaling::LocalAction;
use crabsignal::testing::{MockPeerFactory, PeerCall};
use crabsignal::webrtc::{ConnectionState, NegotiationState, PeerEvent, SdpType};
use crabsignal::CallStatus;
use serde_json::json;

#[tokio::test]
async fn caller_start_offer_emits_one_offer() {
    let mut h = Harness::new("alice").await;
    let call_id = h.call_and_offer("p").await;
    assert_eq!(call_id, "c1");

    let offers = h.published("webrtc.offer");
    assert_eq!(offers.len(), 1);
    let body = offers[0].json();
    assert_eq!(body["type"], "OFFER");
    assert_eq!(body["callId"], "c1");
    assert_eq!(body["fromUserId"], "alice");
    assert_eq!(body["toUserId"], "p");
    assert_eq!(body["sdp"]["type"], "offer");

    assert_eq!(
        h.peer().calls(),
        vec![
            PeerCall::CreateDataChannel("chat".to_string()),
            PeerCall::CreateOffer,
            PeerCall::SetLocal(SdpType::Offer),
        ]
    );
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::LocalOffered));
    assert_eq!(h.calls.requests(), vec![("p".to_string(), "VIDEO".to_string())]);
}

#[tokio::test]
async fn second_start_offer_is_refused() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;
    h.drain_notices();

    h.act(LocalAction::StartOffer).await;
    assert_eq!(h.published("webrtc.offer").len(), 1);
    assert_eq!(h.error_kinds(), vec![ErrorKind::NegotiationFailure]);
}

#[tokio::test]
async fn callee_answers_exactly_once() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(offer("c1", "alice", "bob")).await;

    let answers = h.published("webrtc.answer");
    assert_eq!(answers.len(), 1);
    let body = answers[0].json();
    assert_eq!(body["type"], "ANSWER");
    assert_eq!(body["callId"], "c1");
    assert_eq!(body["fromUserId"], "bob");
    assert_eq!(body["toUserId"], "alice");
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Negotiated));
}

#[tokio::test]
async fn caller_reaches_negotiated_on_answer() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;
    h.signal(answer("c1", "p", "alice")).await;

    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Negotiated));
    assert_eq!(h.peer().calls().last(), Some(&PeerCall::SetRemote(SdpType::Answer)));
    assert!(h.error_kinds().is_empty());
}

#[tokio::test]
async fn buffered_candidates_apply_in_order_after_offer() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    for n in 1..=3 {
        h.signal(candidate("c1", "alice", "bob", &format!("candidate:{n}"))).await;
    }
    assert!(h.peer().calls().is_empty());

    h.signal(offer("c1", "alice", "bob")).await;
    h.signal(candidate("c1", "alice", "bob", "candidate:4")).await;

    assert_eq!(
        h.peer().calls(),
        vec![
            PeerCall::SetRemote(SdpType::Offer),
            PeerCall::AddCandidate("candidate:1".to_string()),
            PeerCall::AddCandidate("candidate:2".to_string()),
            PeerCall::AddCandidate("candidate:3".to_string()),
            PeerCall::CreateAnswer,
            PeerCall::SetLocal(SdpType::Answer),
            PeerCall::AddCandidate("candidate:4".to_string()),
        ]
    );
    assert_eq!(h.published("webrtc.answer").len(), 1);
}

#[tokio::test]
async fn stray_offer_has_no_effect() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    let before = h.orch.snapshot();
    h.drain_notices();

    h.signal(offer("c2", "mallory", "bob")).await;
    h.signal(candidate("c2", "mallory", "bob", "candidate:9")).await;

    assert_eq!(h.peers.created(), 0);
    assert!(h.bus.published().is_empty());
    assert!(h.drain_notices().is_empty());
    assert_eq!(h.orch.snapshot(), before);
}

#[tokio::test]
async fn local_candidates_go_to_the_peer() {
    let mut h = Harness::with_peers("alice", MockPeerFactory::with_local_candidates(2)).await;
    h.call_and_offer("p").await;

    let ice = h.published("webrtc.ice");
    assert_eq!(ice.len(), 2);
    for msg in &ice {
        let body = msg.json();
        assert_eq!(body["type"], "ICE_CANDIDATE");
        assert_eq!(body["toUserId"], "p");
        assert!(body["candidate"]["candidate"].as_str().unwrap().starts_with("candidate:local"));
    }
}

#[tokio::test]
async fn bad_candidate_is_reported_and_session_continues() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(offer("c1", "alice", "bob")).await;
    h.peer().reject_candidate("candidate:bad");
    h.drain_notices();

    h.signal(candidate("c1", "alice", "bob", "candidate:bad")).await;
    h.signal(candidate("c1", "alice", "bob", "candidate:good")).await;

    let calls = h.peer().calls();
    assert!(calls.contains(&PeerCall::AddCandidate("candidate:bad".to_string())));
    assert_eq!(calls.last(), Some(&PeerCall::AddCandidate("candidate:good".to_string())));
    assert_eq!(h.error_kinds(), vec![ErrorKind::CandidateApplyFailure]);
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Negotiated));
}

#[tokio::test]
async fn rejected_buffered_candidate_is_reported() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(candidate("c1", "alice", "bob", "candidate:bad")).await;
    h.peer().reject_candidate("candidate:bad");
    h.signal(candidate("c1", "alice", "bob", "candidate:good")).await;
    h.drain_notices();

    h.signal(offer("c1", "alice", "bob")).await;

    assert_eq!(
        h.peer().calls(),
        vec![
            PeerCall::SetRemote(SdpType::Offer),
            PeerCall::AddCandidate("candidate:bad".to_string()),
            PeerCall::AddCandidate("candidate:good".to_string()),
            PeerCall::CreateAnswer,
            PeerCall::SetLocal(SdpType::Answer),
        ]
    );
    assert_eq!(h.error_kinds(), vec![ErrorKind::CandidateApplyFailure]);
    assert_eq!(h.published("webrtc.answer").len(), 1);
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Negotiated));
}

#[tokio::test]
async fn negotiation_failure_leaves_state_alone() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.peers.fail_next_op("set_remote_description");
    h.drain_notices();

    h.signal(offer("c1", "alice", "bob")).await;

    assert!(h.published("webrtc.answer").is_empty());
    assert_eq!(h.error_kinds(), vec![ErrorKind::NegotiationFailure]);
    assert_eq!(h.status(), Some(CallStatus::Created));
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::New));
    assert_eq!(h.peer().close_count(), 0);
}

#[tokio::test]
async fn glare_offer_is_refused() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;
    h.drain_notices();

    h.signal(offer("c1", "p", "alice")).await;
    assert!(h.published("webrtc.answer").is_empty());
    assert_eq!(h.error_kinds(), vec![ErrorKind::NegotiationFailure]);
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::LocalOffered));
}

#[tokio::test]
async fn offer_without_known_peer_is_dropped_and_counted() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", None).await;
    h.drain_notices();

    h.act(LocalAction::StartOffer).await;

    assert!(h.published("webrtc.offer").is_empty());
    assert_eq!(h.orch.snapshot().dropped_outbound, 1);
    assert!(h.error_kinds().is_empty());
}

#[tokio::test]
async fn callee_learns_peer_from_offer() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", None).await;
    h.signal(offer("c1", "alice", "bob")).await;

    assert_eq!(h.orch.call().unwrap().peer_id.as_deref(), Some("alice"));
    assert_eq!(h.published("webrtc.answer")[0].json()["toUserId"], "alice");
}

#[tokio::test]
async fn connection_and_data_events_surface_as_notices() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(offer("c1", "alice", "bob")).await;
    h.drain_notices();

    let peer = h.peer();
    peer.emit(PeerEvent::ConnectionState(ConnectionState::Connected));
    peer.emit(PeerEvent::DataChannelOpen("chat".to_string()));
    peer.emit(PeerEvent::DataMessage("hi bob".to_string()));
    h.orch.settle().await;

    let notices = h.drain_notices();
    assert!(notices.contains(&crabsignal::Notice::Connection(ConnectionState::Connected)));
    assert!(notices.contains(&crabsignal::Notice::DataMessage {
        text: "hi bob".to_string()
    }));
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Connected));

    h.act(LocalAction::SendText("hi alice".to_string())).await;
    assert_eq!(peer.calls().last(), Some(&PeerCall::SendText("hi alice".to_string())));
}

#[tokio::test]
async fn renegotiation_offer_is_answered() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.signal(offer("c1", "alice", "bob")).await;
    h.notify(json!({"type": "CALL_ACCEPTED", "callId": "c1"})).await;
    h.signal(offer("c1", "alice", "bob")).await;

    assert_eq!(h.published("webrtc.answer").len(), 2);
    assert_eq!(h.peers.created(), 1);
}
