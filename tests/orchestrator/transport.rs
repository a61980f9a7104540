use super::harness::*;
use crabsignal::bus::BusEvent;
use crabsignal::errors::ErrorKind;
use crabsignal::signaling::LocalAction;
use crabsignal::webrtc::NegotiationState;
use crabsignal::{CallStatus, Notice};

#[tokio::test]
async fn disconnect_keeps_call_state_and_reconnect_resubscribes() {
    let mut h = Harness::new("alice").await;
    h.call_and_offer("p").await;
    h.drain_notices();
    let before = h.orch.snapshot();
    assert!(before.transport_up);

    h.orch
        .handle_bus_event(BusEvent::Disconnected {
            reason: "socket closed".to_string(),
        })
        .await;
    let lost = h.orch.snapshot();
    assert!(!lost.transport_up);
    assert_eq!(lost.call, before.call);
    assert_eq!(lost.peer_state, Some(NegotiationState::LocalOffered));
    assert_eq!(h.peer().close_count(), 0);
    assert_eq!(
        h.drain_notices(),
        vec![Notice::TransportLost {
            reason: "socket closed".to_string()
        }]
    );

    h.orch.handle_bus_event(BusEvent::Reconnected).await;
    assert!(h.orch.snapshot().transport_up);
    assert_eq!(
        h.bus.subscriptions(),
        vec![CALL_CHANNEL, SIGNAL_CHANNEL, CALL_CHANNEL, SIGNAL_CHANNEL]
    );
    assert_eq!(h.drain_notices(), vec![Notice::TransportRestored]);

    // Negotiation picks up where it left off.
    h.signal(answer("c1", "p", "alice")).await;
    assert_eq!(h.orch.peer_state(), Some(NegotiationState::Negotiated));
}

#[tokio::test]
async fn publish_while_offline_reports_transport_error() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.drain_notices();
    h.bus.set_offline(true);

    h.act(LocalAction::Accept).await;

    // The local transition stands even though the command was not delivered.
    assert_eq!(h.status(), Some(CallStatus::Accepted));
    assert_eq!(h.error_kinds(), vec![ErrorKind::Transport]);
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_reported_as_codec_errors() {
    let mut h = Harness::new("bob").await;
    h.deliver(CALL_CHANNEL, "{not json".to_string()).await;
    assert_eq!(h.error_kinds(), vec![ErrorKind::Codec]);
    assert!(h.orch.call().is_none());

    h.incoming("c1", Some("alice")).await;
    h.drain_notices();
    h.deliver(SIGNAL_CHANNEL, r#"{"type":"OFFER","callId":"c1"}"#.to_string())
        .await;
    h.deliver(SIGNAL_CHANNEL, "{not json".to_string()).await;

    assert_eq!(h.error_kinds(), vec![ErrorKind::Codec, ErrorKind::Codec]);
    assert_eq!(h.status(), Some(CallStatus::Created));
}

#[tokio::test]
async fn malformed_signal_for_other_call_is_dropped_silently() {
    let mut h = Harness::new("bob").await;
    h.incoming("c1", Some("alice")).await;
    h.drain_notices();

    h.deliver(
        SIGNAL_CHANNEL,
        r#"{"type":"OFFER","callId":"c2","fromUserId":"carol","toUserId":"bob"}"#.to_string(),
    )
    .await;

    assert!(h.drain_notices().is_empty());
    assert_eq!(h.peers.created(), 0);
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn messages_on_other_destinations_are_ignored() {
    let mut h = Harness::new("alice").await;
    h.deliver("/topic/presence", "{}".to_string()).await;
    assert!(h.drain_notices().is_empty());
}
