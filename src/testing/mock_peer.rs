use crate::errors::{SignalError, SignalResult};
use crate::webrtc::primitive::{
    IceCandidate, PeerConnector, PeerEvent, PeerEventSink, PeerFactory, SdpType,
    SessionDescription,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// One invocation on the primitive, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateDataChannel(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    SendText(String),
    Close,
}

#[derive(Default)]
struct MockState {
    calls: Vec<PeerCall>,
    fail_next: HashSet<&'static str>,
    rejected_candidates: HashSet<String>,
    gates: HashMap<&'static str, Arc<Notify>>,
    sink: Option<PeerEventSink>,
    local_candidates: usize,
}

/// Scriptable peer connection.
///
/// Operation names used by [`MockPeer::fail_next`] and [`MockPeer::stall`]
/// are the trait method names (`"set_remote_description"`, `"create_answer"`, ...).
#[derive(Default)]
pub struct MockPeer {
    state: Mutex<MockState>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.lock().calls.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == PeerCall::Close)
            .count()
    }

    /// Makes the next invocation of `op` fail.
    pub fn fail_next(&self, op: &'static str) {
        self.lock().fail_next.insert(op);
    }

    /// Rejects this candidate string every time it is added.
    pub fn reject_candidate(&self, candidate: &str) {
        self.lock().rejected_candidates.insert(candidate.to_string());
    }

    /// Suspends `op` until the returned gate is notified.
    pub fn stall(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gates.insert(op, Arc::clone(&gate));
        gate
    }

    /// Number of local candidates "gathered" after each local description.
    pub fn gather_candidates(&self, count: usize) {
        self.lock().local_candidates = count;
    }

    pub fn attach(&self, sink: PeerEventSink) {
        self.lock().sink = Some(sink);
    }

    /// Raises an event as if the primitive produced it.
    pub fn emit(&self, event: PeerEvent) {
        let sink = self.lock().sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    async fn enter(&self, op: &'static str, call: PeerCall) -> SignalResult<()> {
        let gate = self.lock().gates.remove(op);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.lock();
        state.calls.push(call);
        if state.fail_next.remove(op) {
            return Err(SignalError::NegotiationFailure(format!("{op} failed (scripted)")));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for MockPeer {
    async fn create_data_channel(&self, label: &str) -> SignalResult<()> {
        self.enter("create_data_channel", PeerCall::CreateDataChannel(label.to_string()))
            .await
    }

    async fn create_offer(&self) -> SignalResult<SessionDescription> {
        self.enter("create_offer", PeerCall::CreateOffer).await?;
        Ok(SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n"))
    }

    async fn create_answer(&self) -> SignalResult<SessionDescription> {
        self.enter("create_answer", PeerCall::CreateAnswer).await?;
        Ok(SessionDescription::answer("v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> SignalResult<()> {
        self.enter("set_local_description", PeerCall::SetLocal(desc.sdp_type))
            .await?;
        let (sink, count) = {
            let state = self.lock();
            (state.sink.clone(), state.local_candidates)
        };
        if let Some(sink) = sink {
            for n in 0..count {
                sink.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
                    "candidate:local{n} 1 UDP 2122260223 127.0.0.1 {} typ host",
                    50000 + n
                ))));
            }
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()> {
        self.enter("set_remote_description", PeerCall::SetRemote(desc.sdp_type))
            .await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()> {
        let rejected = self.lock().rejected_candidates.contains(&candidate.candidate);
        self.enter("add_ice_candidate", PeerCall::AddCandidate(candidate.candidate.clone()))
            .await?;
        if rejected {
            return Err(SignalError::CandidateApplyFailure(format!(
                "{} rejected (scripted)",
                candidate.candidate
            )));
        }
        Ok(())
    }

    async fn send_text(&self, text: &str) -> SignalResult<()> {
        self.enter("send_text", PeerCall::SendText(text.to_string())).await
    }

    async fn close(&self) -> SignalResult<()> {
        self.enter("close", PeerCall::Close).await
    }
}

/// Hands out a fresh [`MockPeer`] per session and keeps them for inspection.
#[derive(Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<Arc<MockPeer>>>,
    local_candidates: usize,
    fail_create: Mutex<bool>,
    next_peer: Mutex<NextPeerScript>,
}

#[derive(Default)]
struct NextPeerScript {
    gates: Vec<(&'static str, Arc<Notify>)>,
    failures: Vec<&'static str>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_local_candidates(count: usize) -> Arc<Self> {
        Arc::new(Self {
            local_candidates: count,
            ..Self::default()
        })
    }

    pub fn fail_next_create(&self) {
        *self.fail_create.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    /// Stalls `op` on the next peer this factory creates.
    pub fn stall_next(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.next_peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gates
            .push((op, Arc::clone(&gate)));
        gate
    }

    /// Makes the first `op` of the next created peer fail.
    pub fn fail_next_op(&self, op: &'static str) {
        self.next_peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failures
            .push(op);
    }

    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn created(&self) -> usize {
        self.peers().len()
    }

    pub fn last(&self) -> Option<Arc<MockPeer>> {
        self.peers().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(&self, sink: PeerEventSink) -> SignalResult<Arc<dyn PeerConnector>> {
        {
            let mut fail = self.fail_create.lock().unwrap_or_else(|e| e.into_inner());
            if *fail {
                *fail = false;
                return Err(SignalError::NegotiationFailure(
                    "peer connection creation failed (scripted)".to_string(),
                ));
            }
        }

        let peer = MockPeer::new();
        peer.gather_candidates(self.local_candidates);
        peer.attach(sink);
        {
            let script = std::mem::take(&mut *self.next_peer.lock().unwrap_or_else(|e| e.into_inner()));
            let mut state = peer.lock();
            state.gates.extend(script.gates);
            state.fail_next.extend(script.failures);
        }
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&peer));
        Ok(peer)
    }
}
