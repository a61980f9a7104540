//! Per-session operation queue.
//!
//! Inbound work for a [`PeerSession`] is queued here and executed strictly in
//! arrival order by one task, so an offer or answer always finishes (including
//! its candidate drain) before the next candidate is looked at. Closing goes
//! around the queue through the session's [`CloseHandle`], which is what lets
//! a stalled negotiation be ended.

use crate::errors::SignalError;
use crate::webrtc::primitive::{ConnectionState, IceCandidate, SessionDescription};
use crate::webrtc::session::{CandidateOutcome, CloseHandle, NegotiationState, PeerSession};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum SessionOp {
    StartOffer,
    RemoteOffer { from_id: String, sdp: SessionDescription },
    RemoteAnswer { sdp: SessionDescription },
    RemoteCandidate { candidate: IceCandidate },
    ConnectionChanged(ConnectionState),
    SendText(String),
    /// Answered once every operation queued before it has finished.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug)]
pub enum SessionOutput {
    Offer(SessionDescription),
    Answer { to_id: String, answer: SessionDescription },
    StateChanged(NegotiationState),
    Failed(SignalError),
}

#[derive(Debug)]
pub struct SessionReport {
    pub generation: u64,
    pub output: SessionOutput,
}

/// Owner-side handle of a running session task.
pub struct SessionHandle {
    call_id: String,
    generation: u64,
    ops: mpsc::UnboundedSender<SessionOp>,
    closer: CloseHandle,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn(session: PeerSession, reports: mpsc::UnboundedSender<SessionReport>) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let call_id = session.call_id().to_string();
        let generation = session.generation();
        let closer = session.close_handle();
        let task = tokio::spawn(run_session(session, ops_rx, reports));
        Self {
            call_id,
            generation,
            ops: ops_tx,
            closer,
            task,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub fn submit(&self, op: SessionOp) -> bool {
        self.ops.send(op).is_ok()
    }

    /// Waits until everything queued so far has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.submit(SessionOp::Flush(tx)) {
            let _ = rx.await;
        }
    }

    /// Closes the connection immediately and stops accepting work. The task
    /// winds down once any in-flight operation notices the close.
    pub async fn close(self) -> JoinHandle<()> {
        self.closer.close().await;
        self.task
    }
}

async fn run_session(
    mut session: PeerSession,
    mut ops: mpsc::UnboundedReceiver<SessionOp>,
    reports: mpsc::UnboundedSender<SessionReport>,
) {
    let generation = session.generation();
    let report = |output: SessionOutput| {
        let _ = reports.send(SessionReport { generation, output });
    };
    let mut last_state = session.state();

    while let Some(op) = ops.recv().await {
        if let SessionOp::Flush(done) = op {
            let _ = done.send(());
            continue;
        }
        if session.is_closed() {
            break;
        }

        let result = match op {
            SessionOp::StartOffer => session.start_as_caller().await.map(|offer| Some(SessionOutput::Offer(offer))),
            SessionOp::RemoteOffer { from_id, sdp } => session
                .handle_offer(sdp)
                .await
                .map(|answer| Some(SessionOutput::Answer { to_id: from_id, answer })),
            SessionOp::RemoteAnswer { sdp } => session.handle_answer(sdp).await.map(|_| None),
            SessionOp::RemoteCandidate { candidate } => match session.handle_candidate(candidate).await {
                Ok(CandidateOutcome::Rejected(reason)) => {
                    Ok(Some(SessionOutput::Failed(SignalError::CandidateApplyFailure(reason))))
                }
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            },
            SessionOp::ConnectionChanged(state) => {
                session.on_connection_state(state);
                Ok(None)
            }
            SessionOp::SendText(text) => session.send_text(&text).await.map(|_| None),
            SessionOp::Flush(_) => Ok(None),
        };

        match result {
            Ok(Some(output)) => report(output),
            Ok(None) => {}
            Err(SignalError::SessionClosed) => {
                log::debug!("generation {}: discarding result after close", generation);
                break;
            }
            Err(e) => report(SessionOutput::Failed(e)),
        }
        for reason in session.take_drain_rejections() {
            report(SessionOutput::Failed(SignalError::CandidateApplyFailure(reason)));
        }

        let state = session.state();
        if state != last_state {
            last_state = state;
            report(SessionOutput::StateChanged(state));
        }
    }

    session.close().await;

    // Keep answering flushes so an owner waiting on this session never hangs.
    ops.close();
    while let Some(op) = ops.recv().await {
        if let SessionOp::Flush(done) = op {
            let _ = done.send(());
        }
    }
    log::debug!("generation {}: session task finished", generation);
}
