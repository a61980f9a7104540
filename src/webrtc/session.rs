use crate::check_invariant;
use crate::errors::{SignalError, SignalResult};
use crate::invariant::SESSION_CLOSED_ONCE;
use crate::webrtc::ice_buffer::{Admit, IceBuffer};
use crate::webrtc::primitive::{ConnectionState, IceCandidate, PeerConnector, SdpType, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Negotiation progress of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    New,
    LocalOffered,
    RemoteOffered,
    Negotiated,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::New => "NEW",
            NegotiationState::LocalOffered => "LOCAL_OFFERED",
            NegotiationState::RemoteOffered => "REMOTE_OFFERED",
            NegotiationState::Negotiated => "NEGOTIATED",
            NegotiationState::Connected => "CONNECTED",
            NegotiationState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Queued,
    Rejected(String),
}

/// Closes a session's connection from outside the task that is negotiating on it.
///
/// Operations suspended on the primitive observe the flag when they resume and
/// drop whatever the primitive returned.
#[derive(Clone)]
pub struct CloseHandle {
    inner: Arc<CloseInner>,
}

struct CloseInner {
    generation: u64,
    closed: AtomicBool,
    closes: AtomicU32,
    peer: Arc<dyn PeerConnector>,
}

impl CloseHandle {
    fn new(generation: u64, peer: Arc<dyn PeerConnector>) -> Self {
        Self {
            inner: Arc::new(CloseInner {
                generation,
                closed: AtomicBool::new(false),
                closes: AtomicU32::new(0),
                peer,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call closed the connection, `false` if it was already closed.
    pub async fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let closes = self.inner.closes.fetch_add(1, Ordering::SeqCst) + 1;
        check_invariant!(closes == 1, SESSION_CLOSED_ONCE, "CloseHandle::close");

        log::info!("closing peer connection (generation {})", self.inner.generation);
        if let Err(e) = self.inner.peer.close().await {
            log::warn!("peer connection close failed: {}", e);
        }
        true
    }
}

/// One peer connection and its data channel for the lifetime of a single call.
///
/// Methods take `&mut self`, so one session never runs two negotiation steps at
/// once; the owner queues inbound work in front of it.
pub struct PeerSession {
    call_id: String,
    peer: Arc<dyn PeerConnector>,
    closer: CloseHandle,
    state: NegotiationState,
    ice: IceBuffer,
    data_label: String,
    data_channel_ready: bool,
    drain_rejections: Vec<String>,
    applied_candidates: usize,
    rejected_candidates: usize,
}

impl PeerSession {
    pub fn new(
        call_id: impl Into<String>,
        generation: u64,
        peer: Arc<dyn PeerConnector>,
        data_label: impl Into<String>,
    ) -> Self {
        let closer = CloseHandle::new(generation, Arc::clone(&peer));
        Self {
            call_id: call_id.into(),
            peer,
            closer,
            state: NegotiationState::New,
            ice: IceBuffer::new(),
            data_label: data_label.into(),
            data_channel_ready: false,
            drain_rejections: Vec::new(),
            applied_candidates: 0,
            rejected_candidates: 0,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn generation(&self) -> u64 {
        self.closer.generation()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// True once a remote description has been applied.
    pub fn is_remote_ready(&self) -> bool {
        self.ice.is_drained()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.ice.len()
    }

    pub fn candidate_stats(&self) -> (usize, usize) {
        (self.applied_candidates, self.rejected_candidates)
    }

    /// Reasons for buffered candidates the primitive refused during the last drain.
    pub fn take_drain_rejections(&mut self) -> Vec<String> {
        std::mem::take(&mut self.drain_rejections)
    }

    fn ensure_open(&self) -> SignalResult<()> {
        if self.closer.is_closed() {
            return Err(SignalError::SessionClosed);
        }
        Ok(())
    }

    fn step_failed(&self, step: &str, err: SignalError) -> SignalError {
        if self.closer.is_closed() {
            return SignalError::SessionClosed;
        }
        log::warn!("call {}: {} failed: {}", self.call_id, step, err);
        SignalError::NegotiationFailure(format!("{}: {}", step, err))
    }

    /// Opens the data channel and produces the local offer.
    pub async fn start_as_caller(&mut self) -> SignalResult<SessionDescription> {
        self.ensure_open()?;
        if self.state != NegotiationState::New {
            return Err(SignalError::NegotiationFailure(format!(
                "cannot offer from state {}",
                self.state
            )));
        }

        log::info!("call {}: creating offer", self.call_id);
        if !self.data_channel_ready {
            self.peer
                .create_data_channel(&self.data_label)
                .await
                .map_err(|e| self.step_failed("create data channel", e))?;
            self.ensure_open()?;
            self.data_channel_ready = true;
        }

        let offer = self
            .peer
            .create_offer()
            .await
            .map_err(|e| self.step_failed("create offer", e))?;
        self.ensure_open()?;

        self.peer
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.step_failed("set local description", e))?;
        self.ensure_open()?;

        self.state = NegotiationState::LocalOffered;
        Ok(offer)
    }

    /// Applies a remote offer, releases buffered candidates and answers it.
    pub async fn handle_offer(&mut self, sdp: SessionDescription) -> SignalResult<SessionDescription> {
        self.ensure_open()?;
        if sdp.sdp_type != SdpType::Offer {
            return Err(SignalError::NegotiationFailure(
                "expected an offer description".to_string(),
            ));
        }
        if self.state == NegotiationState::LocalOffered {
            return Err(SignalError::NegotiationFailure(
                "remote offer while a local offer is outstanding".to_string(),
            ));
        }

        log::info!("call {}: applying remote offer", self.call_id);
        self.peer
            .set_remote_description(sdp)
            .await
            .map_err(|e| self.step_failed("set remote description", e))?;
        self.ensure_open()?;
        if self.state == NegotiationState::New {
            self.state = NegotiationState::RemoteOffered;
        }
        self.release_buffered().await?;

        let answer = self
            .peer
            .create_answer()
            .await
            .map_err(|e| self.step_failed("create answer", e))?;
        self.ensure_open()?;

        self.peer
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.step_failed("set local description", e))?;
        self.ensure_open()?;

        if self.state != NegotiationState::Connected {
            self.state = NegotiationState::Negotiated;
        }
        Ok(answer)
    }

    pub async fn handle_answer(&mut self, sdp: SessionDescription) -> SignalResult<()> {
        self.ensure_open()?;
        if sdp.sdp_type != SdpType::Answer {
            return Err(SignalError::NegotiationFailure(
                "expected an answer description".to_string(),
            ));
        }
        if self.state != NegotiationState::LocalOffered {
            return Err(SignalError::NegotiationFailure(format!(
                "unexpected answer in state {}",
                self.state
            )));
        }

        log::info!("call {}: applying remote answer", self.call_id);
        self.peer
            .set_remote_description(sdp)
            .await
            .map_err(|e| self.step_failed("set remote description", e))?;
        self.ensure_open()?;
        self.state = NegotiationState::Negotiated;
        self.release_buffered().await
    }

    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> SignalResult<CandidateOutcome> {
        self.ensure_open()?;
        match self.ice.offer(candidate) {
            Admit::ApplyNow(candidate) => {
                let outcome = self.apply_candidate(candidate).await;
                self.ensure_open()?;
                Ok(outcome)
            }
            Admit::Queued { depth } => {
                log::debug!("call {}: candidate buffered ({} pending)", self.call_id, depth);
                Ok(CandidateOutcome::Queued)
            }
        }
    }

    async fn release_buffered(&mut self) -> SignalResult<()> {
        let pending = self.ice.drain();
        if !pending.is_empty() {
            log::info!(
                "call {}: applying {} buffered candidates",
                self.call_id,
                pending.len()
            );
        }
        for candidate in pending {
            if let CandidateOutcome::Rejected(reason) = self.apply_candidate(candidate).await {
                self.drain_rejections.push(reason);
            }
            self.ensure_open()?;
        }
        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        log::debug!("call {}: adding candidate {}", self.call_id, candidate.candidate);
        match self.peer.add_ice_candidate(candidate).await {
            Ok(()) => {
                self.applied_candidates += 1;
                CandidateOutcome::Applied
            }
            Err(e) => {
                self.rejected_candidates += 1;
                log::warn!("call {}: candidate rejected: {}", self.call_id, e);
                CandidateOutcome::Rejected(e.to_string())
            }
        }
    }

    pub fn on_connection_state(&mut self, state: ConnectionState) {
        if self.state == NegotiationState::Closed {
            return;
        }
        match state {
            ConnectionState::Connected => self.state = NegotiationState::Connected,
            ConnectionState::Failed | ConnectionState::Disconnected => {
                log::warn!("call {}: connection {}", self.call_id, state);
            }
            _ => {}
        }
    }

    pub async fn send_text(&self, text: &str) -> SignalResult<()> {
        self.ensure_open()?;
        self.peer.send_text(text).await
    }

    /// Closes the data channel and connection. Repeated calls do nothing.
    pub async fn close(&mut self) {
        self.closer.close().await;
        self.ice.clear();
        self.state = NegotiationState::Closed;
    }
}
