//! Two orchestrators talking through the in-process hub.

use crabsignal::bus::BusEvent;
use crabsignal::signaling::{LocalAction, Notice, OrchestratorSettings, SignalingOrchestrator};
use crabsignal::testing::{MockPeerFactory, PeerCall};
use crabsignal::webrtc::NegotiationState;
use crabsignal::{CallStatus, LocalCallApi, LocalHub};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Side {
    orch: SignalingOrchestrator,
    notices: mpsc::UnboundedReceiver<Notice>,
    events: mpsc::UnboundedReceiver<BusEvent>,
    peers: Arc<MockPeerFactory>,
}

async fn join(hub: &Arc<LocalHub>, name: &str) -> Side {
    let (bus, events) = hub.connect(name);
    let peers = MockPeerFactory::with_local_candidates(1);
    let (mut orch, notices) = SignalingOrchestrator::new(
        OrchestratorSettings::new(name),
        bus,
        Arc::new(LocalCallApi::new(Arc::clone(hub), name)),
        peers.clone(),
    );
    orch.start().await.unwrap();
    Side {
        orch,
        notices,
        events,
        peers,
    }
}

/// Moves bus traffic between both sides until neither has anything left.
async fn pump(a: &mut Side, b: &mut Side) {
    loop {
        let mut moved = false;
        for side in [&mut *a, &mut *b] {
            side.orch.settle().await;
            while let Ok(event) = side.events.try_recv() {
                moved = true;
                side.orch.handle_bus_event(event).await;
                side.orch.settle().await;
            }
        }
        if !moved {
            break;
        }
    }
}

#[tokio::test]
async fn full_call_over_the_hub() {
    let hub = LocalHub::with_defaults();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;

    alice
        .orch
        .perform(LocalAction::CreateCall {
            target: "bob".to_string(),
            category: None,
        })
        .await;
    pump(&mut alice, &mut bob).await;
    let call_id = alice.orch.call().unwrap().call_id.clone();
    let incoming = bob.orch.call().unwrap();
    assert_eq!(incoming.call_id, call_id);
    assert_eq!(incoming.peer_id.as_deref(), Some("alice"));
    assert_eq!(incoming.status, CallStatus::Created);

    bob.orch.perform(LocalAction::Accept).await;
    pump(&mut alice, &mut bob).await;
    assert_eq!(alice.orch.call().unwrap().status, CallStatus::Accepted);

    alice.orch.perform(LocalAction::StartOffer).await;
    pump(&mut alice, &mut bob).await;
    assert_eq!(alice.orch.peer_state(), Some(NegotiationState::Negotiated));
    assert_eq!(bob.orch.peer_state(), Some(NegotiationState::Negotiated));

    // Each side applied the single candidate the other gathered.
    let applied = |side: &Side| {
        side.peers
            .last()
            .unwrap()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, PeerCall::AddCandidate(_)))
            .count()
    };
    assert_eq!(applied(&alice), 1);
    assert_eq!(applied(&bob), 1);

    alice.orch.perform(LocalAction::End).await;
    pump(&mut alice, &mut bob).await;
    assert_eq!(bob.orch.call().unwrap().status, CallStatus::Ended);
    assert_eq!(bob.orch.peer_state(), Some(NegotiationState::Closed));
    assert_eq!(alice.peers.last().unwrap().close_count(), 1);
    assert_eq!(bob.peers.last().unwrap().close_count(), 1);

    while let Ok(notice) = bob.notices.try_recv() {
        assert!(!matches!(notice, Notice::Error { .. }), "bob saw {notice:?}");
    }
    while let Ok(notice) = alice.notices.try_recv() {
        assert!(!matches!(notice, Notice::Error { .. }), "alice saw {notice:?}");
    }
}

#[tokio::test]
async fn rejected_call_reaches_caller() {
    let hub = LocalHub::with_defaults();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;

    alice
        .orch
        .perform(LocalAction::CreateCall {
            target: "bob".to_string(),
            category: Some("AUDIO".to_string()),
        })
        .await;
    pump(&mut alice, &mut bob).await;
    bob.orch
        .perform(LocalAction::Reject {
            reason: Some("busy".to_string()),
        })
        .await;
    pump(&mut alice, &mut bob).await;

    let call = alice.orch.call().unwrap();
    assert_eq!(call.status, CallStatus::Rejected);
    assert_eq!(call.reject_reason.as_deref(), Some("busy"));
}

async fn wait_for(
    notices: &mut mpsc::UnboundedReceiver<Notice>,
    pred: impl Fn(&Notice) -> bool,
) -> Notice {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let notice = notices.recv().await.expect("orchestrator stopped");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

fn status_is(status: CallStatus) -> impl Fn(&Notice) -> bool {
    move |n| matches!(n, Notice::CallStatus { status: s, .. } if *s == status)
}

#[tokio::test]
async fn run_loops_drive_a_call_and_hang_up_on_shutdown() {
    let hub = LocalHub::with_defaults();
    let alice = join(&hub, "alice").await;
    let bob = join(&hub, "bob").await;

    let mut alice_notices = alice.notices;
    let mut bob_notices = bob.notices;
    let alice_snapshots = alice.orch.snapshots();
    let (alice_tx, alice_rx) = mpsc::unbounded_channel();
    let (bob_tx, bob_rx) = mpsc::unbounded_channel();
    let alice_task = tokio::spawn(alice.orch.run(alice.events, alice_rx));
    let bob_task = tokio::spawn(bob.orch.run(bob.events, bob_rx));

    alice_tx
        .send(LocalAction::CreateCall {
            target: "bob".to_string(),
            category: None,
        })
        .unwrap();
    wait_for(&mut bob_notices, status_is(CallStatus::Created)).await;

    bob_tx.send(LocalAction::Accept).unwrap();
    wait_for(&mut alice_notices, status_is(CallStatus::Accepted)).await;

    alice_tx.send(LocalAction::StartOffer).unwrap();
    wait_for(&mut bob_notices, |n| {
        matches!(n, Notice::PeerState { state: NegotiationState::Negotiated, .. })
    })
    .await;
    wait_for(&mut alice_notices, |n| {
        matches!(n, Notice::PeerState { state: NegotiationState::Negotiated, .. })
    })
    .await;

    // Closing the action stream hangs up the live call.
    drop(alice_tx);
    alice_task.await.unwrap();
    assert_eq!(
        alice_snapshots.borrow().call.as_ref().map(|c| c.status),
        Some(CallStatus::Ended)
    );
    wait_for(&mut bob_notices, status_is(CallStatus::Ended)).await;

    drop(bob_tx);
    bob_task.await.unwrap();
}
