use crate::api::CallApi;
use crate::bus::{BusEvent, MessageBus};
use crate::call::{CallLifecycle, CallSession, CallStatus, EndOutcome};
use crate::config::HarnessConfig;
use crate::errors::{ErrorKind, SignalError, SignalResult};
use crate::signaling::codec::{
    decode_notification, decode_signal, encode_command, encode_signal, peek_call_id, CallCommand,
    CallNotification, Destination, SignalMessage, SignalPayload,
};
use crate::signaling::worker::{SessionHandle, SessionOp, SessionOutput, SessionReport};
use crate::webrtc::primitive::{
    ConnectionState, PeerEvent, PeerEventSink, PeerFactory, TaggedPeerEvent,
};
use crate::webrtc::session::{NegotiationState, PeerSession};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Things the person driving the harness asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    CreateCall {
        target: String,
        category: Option<String>,
    },
    Accept,
    Reject {
        reason: Option<String>,
    },
    StartOffer,
    End,
    SendText(String),
}

/// User-visible output of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CallStatus { call_id: String, status: CallStatus },
    PeerState { call_id: String, state: NegotiationState },
    Connection(ConnectionState),
    DataChannelOpen { label: String },
    DataMessage { text: String },
    DataChannelClosed { label: String },
    Error { kind: ErrorKind, message: String },
    TransportLost { reason: String },
    TransportRestored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    pub call: Option<CallSession>,
    pub peer_state: Option<NegotiationState>,
    pub transport_up: bool,
    pub dropped_outbound: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub local_id: String,
    pub app_prefix: String,
    pub call_channel: String,
    pub signal_channel: String,
    pub data_channel_label: String,
    pub default_category: String,
}

impl OrchestratorSettings {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self::from_config(&HarnessConfig::default()).with_local_id(local_id)
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            local_id: config.identity.user_id.clone(),
            app_prefix: config.bus.app_prefix.clone(),
            call_channel: config.bus.call_channel.clone(),
            signal_channel: config.bus.signal_channel.clone(),
            data_channel_label: config.rtc.data_channel_label.clone(),
            default_category: config.api.default_category.clone(),
        }
    }

    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = local_id.into();
        self
    }
}

/// Sequences call lifecycle events with peer-connection negotiation.
///
/// All call state is mutated from `&mut self`, one event at a time. Negotiation
/// runs on the live session's queue (see [`SessionHandle`]) and reports back
/// through generation-tagged messages; anything tagged with a generation other
/// than the live session's is dropped.
pub struct SignalingOrchestrator {
    settings: OrchestratorSettings,
    bus: Arc<dyn MessageBus>,
    calls: Arc<dyn CallApi>,
    peers: Arc<dyn PeerFactory>,
    lifecycle: CallLifecycle,
    session: Option<SessionHandle>,
    peer_state: Option<NegotiationState>,
    retired: Vec<JoinHandle<()>>,
    next_generation: u64,
    reports_tx: mpsc::UnboundedSender<SessionReport>,
    reports_rx: mpsc::UnboundedReceiver<SessionReport>,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    snapshots: watch::Sender<OrchestratorSnapshot>,
    transport_up: bool,
    dropped_outbound: u64,
}

impl SignalingOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        bus: Arc<dyn MessageBus>,
        calls: Arc<dyn CallApi>,
        peers: Arc<dyn PeerFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let lifecycle = CallLifecycle::new(settings.local_id.clone());
        let (snapshots, _) = watch::channel(OrchestratorSnapshot {
            call: None,
            peer_state: None,
            transport_up: true,
            dropped_outbound: 0,
        });
        let orchestrator = Self {
            settings,
            bus,
            calls,
            peers,
            lifecycle,
            session: None,
            peer_state: None,
            retired: Vec::new(),
            next_generation: 0,
            reports_tx,
            reports_rx,
            peer_tx,
            peer_rx,
            notices,
            snapshots,
            transport_up: true,
            dropped_outbound: 0,
        };
        (orchestrator, notices_rx)
    }

    pub fn local_id(&self) -> &str {
        &self.settings.local_id
    }

    pub fn call(&self) -> Option<&CallSession> {
        self.lifecycle.current()
    }

    pub fn peer_state(&self) -> Option<NegotiationState> {
        self.peer_state
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            call: self.lifecycle.current().cloned(),
            peer_state: self.peer_state,
            transport_up: self.transport_up,
            dropped_outbound: self.dropped_outbound,
        }
    }

    /// Snapshots published by [`run`](Self::run) after every handled event.
    pub fn snapshots(&self) -> watch::Receiver<OrchestratorSnapshot> {
        self.snapshots.subscribe()
    }

    fn refresh_snapshot(&self) {
        let current = self.snapshot();
        self.snapshots.send_if_modified(|seen| {
            if *seen == current {
                return false;
            }
            *seen = current;
            true
        });
    }

    /// Subscribes to the identity's call and signal channels.
    pub async fn start(&mut self) -> SignalResult<()> {
        self.bus.subscribe(&self.settings.call_channel).await?;
        self.bus.subscribe(&self.settings.signal_channel).await?;
        log::info!("{} subscribed to call and signal channels", self.settings.local_id);
        Ok(())
    }

    /// Event loop: runs until the action channel closes.
    pub async fn run(
        mut self,
        mut bus_events: mpsc::UnboundedReceiver<BusEvent>,
        mut actions: mpsc::UnboundedReceiver<LocalAction>,
    ) {
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => self.perform(action).await,
                    None => break,
                },
                Some(event) = bus_events.recv() => self.handle_bus_event(event).await,
                Some(report) = self.reports_rx.recv() => self.on_session_report(report).await,
                Some(event) = self.peer_rx.recv() => self.on_peer_event(event).await,
            }
            self.refresh_snapshot();
        }

        if self.lifecycle.active().is_some() {
            self.perform(LocalAction::End).await;
        }
        self.settle().await;
        self.refresh_snapshot();
        log::info!("{} orchestrator stopped", self.settings.local_id);
    }

    /// Processes queued negotiation work and its results until nothing is left.
    pub async fn settle(&mut self) {
        loop {
            if let Some(session) = &self.session {
                session.flush().await;
            }
            for task in self.retired.drain(..) {
                let _ = task.await;
            }

            let mut handled = false;
            while let Ok(report) = self.reports_rx.try_recv() {
                handled = true;
                self.on_session_report(report).await;
            }
            while let Ok(event) = self.peer_rx.try_recv() {
                handled = true;
                self.on_peer_event(event).await;
            }
            if !handled {
                break;
            }
        }
    }

    pub async fn perform(&mut self, action: LocalAction) {
        if let Err(e) = self.try_perform(action).await {
            self.report(e);
        }
    }

    pub async fn try_perform(&mut self, action: LocalAction) -> SignalResult<()> {
        match action {
            LocalAction::CreateCall { target, category } => self.create_call(target, category).await,
            LocalAction::Accept => {
                let call_id = self.lifecycle.accept()?.call_id.clone();
                self.notify_status();
                self.publish_command(Destination::CallAccept, call_id, None).await
            }
            LocalAction::Reject { reason } => {
                let call_id = self.lifecycle.reject(reason.clone())?.call_id.clone();
                self.notify_status();
                self.close_session().await;
                self.publish_command(Destination::CallReject, call_id, reason).await
            }
            LocalAction::StartOffer => {
                self.lifecycle.active().ok_or(SignalError::NoActiveCall)?;
                self.ensure_session().await?.submit(SessionOp::StartOffer);
                Ok(())
            }
            LocalAction::End => match self.lifecycle.end()? {
                EndOutcome::Ended => {
                    let call_id = self.current_call_id();
                    self.notify_status();
                    self.close_session().await;
                    self.publish_command(Destination::CallEnd, call_id, None).await
                }
                EndOutcome::AlreadyTerminal => Ok(()),
            },
            LocalAction::SendText(text) => {
                let session = self.session.as_ref().ok_or(SignalError::NoActiveCall)?;
                session.submit(SessionOp::SendText(text));
                Ok(())
            }
        }
    }

    async fn create_call(&mut self, target: String, category: Option<String>) -> SignalResult<()> {
        if let Some(live) = self.lifecycle.active() {
            return Err(SignalError::CallInProgress {
                call_id: live.call_id.clone(),
            });
        }

        let category = category.unwrap_or_else(|| self.settings.default_category.clone());
        let created = self.calls.create_call(&target, &category).await?;
        self.close_session().await;
        self.lifecycle
            .create(created.call_id, created.peer_id.or(Some(target)))?;
        self.peer_state = None;
        self.notify_status();
        Ok(())
    }

    pub async fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Message { destination, body } => {
                let result = if destination == self.settings.call_channel {
                    match decode_notification(&body) {
                        Ok(n) => self.on_notification(n).await,
                        Err(e) => Err(e),
                    }
                } else if destination == self.settings.signal_channel {
                    let filtered = match peek_call_id(&body) {
                        Some(call_id) => self.ensure_active(&call_id),
                        None => Ok(()),
                    };
                    match filtered.and_then(|()| decode_signal(&body)) {
                        Ok(msg) => self.on_signal(msg).await,
                        Err(e) => Err(e),
                    }
                } else {
                    log::debug!("ignoring message on {}", destination);
                    Ok(())
                };
                if let Err(e) = result {
                    if e.kind() == ErrorKind::Codec {
                        log::error!("undecodable message on {}: {}", destination, e);
                    }
                    self.report(e);
                }
            }
            BusEvent::Disconnected { reason } => {
                log::warn!("bus connection lost: {}", reason);
                self.transport_up = false;
                self.notify(Notice::TransportLost { reason });
            }
            BusEvent::Reconnected => {
                log::info!("bus reconnected, restoring subscriptions");
                self.transport_up = true;
                match self.start().await {
                    Ok(()) => self.notify(Notice::TransportRestored),
                    Err(e) => self.report(e),
                }
            }
        }
    }

    fn ensure_active(&self, call_id: &str) -> SignalResult<()> {
        match self.lifecycle.active_call_id() {
            Some(active) if active == call_id => Ok(()),
            active => Err(SignalError::CallIdMismatch {
                active: active.map(str::to_string),
                received: call_id.to_string(),
            }),
        }
    }

    pub async fn on_notification(&mut self, notification: CallNotification) -> SignalResult<()> {
        match notification {
            CallNotification::IncomingCall { call_id, from_id } => {
                self.lifecycle.on_incoming(call_id, from_id)?;
                self.close_session().await;
                self.peer_state = None;
                self.notify_status();
            }
            CallNotification::CallAccepted { call_id } => {
                self.ensure_active(&call_id)?;
                self.lifecycle.accept()?;
                self.notify_status();
            }
            CallNotification::CallRejected { call_id, reason } => {
                self.ensure_active(&call_id)?;
                self.lifecycle.reject(reason)?;
                self.notify_status();
                self.close_session().await;
            }
            CallNotification::CallEnded { call_id } => {
                self.ensure_active(&call_id)?;
                if self.lifecycle.end()? == EndOutcome::Ended {
                    self.notify_status();
                    self.close_session().await;
                }
            }
        }
        Ok(())
    }

    pub async fn on_signal(&mut self, msg: SignalMessage) -> SignalResult<()> {
        self.ensure_active(&msg.call_id)?;
        self.lifecycle.learn_peer(&msg.from_id);

        let op = match msg.payload {
            SignalPayload::Offer(sdp) => SessionOp::RemoteOffer {
                from_id: msg.from_id,
                sdp,
            },
            SignalPayload::Answer(sdp) => SessionOp::RemoteAnswer { sdp },
            SignalPayload::IceCandidate(candidate) => SessionOp::RemoteCandidate { candidate },
        };
        self.ensure_session().await?.submit(op);
        Ok(())
    }

    async fn ensure_session(&mut self) -> SignalResult<&SessionHandle> {
        if self.session.is_none() {
            let call_id = self
                .lifecycle
                .active_call_id()
                .ok_or(SignalError::NoActiveCall)?
                .to_string();

            self.next_generation += 1;
            let generation = self.next_generation;
            let sink = PeerEventSink::new(generation, self.peer_tx.clone());
            let peer = self.peers.create(sink).await?;
            let session = PeerSession::new(
                call_id.clone(),
                generation,
                peer,
                self.settings.data_channel_label.clone(),
            );
            log::info!("call {}: peer session generation {} created", call_id, generation);
            self.session = Some(SessionHandle::spawn(session, self.reports_tx.clone()));
            self.set_peer_state(NegotiationState::New);
        }
        self.session.as_ref().ok_or(SignalError::NoActiveCall)
    }

    async fn close_session(&mut self) {
        self.retired.retain(|task| !task.is_finished());
        if let Some(session) = self.session.take() {
            let call_id = session.call_id().to_string();
            self.retired.push(session.close().await);
            self.peer_state = Some(NegotiationState::Closed);
            self.notify(Notice::PeerState {
                call_id,
                state: NegotiationState::Closed,
            });
        }
    }

    fn live_generation(&self) -> Option<u64> {
        self.session
            .as_ref()
            .filter(|s| !s.is_closed())
            .map(|s| s.generation())
    }

    async fn on_session_report(&mut self, report: SessionReport) {
        if self.live_generation() != Some(report.generation) {
            log::debug!("dropping report from retired generation {}", report.generation);
            return;
        }

        match report.output {
            SessionOutput::Offer(offer) => {
                if let Err(e) = self.send_signal(None, SignalPayload::Offer(offer)).await {
                    self.report(e);
                }
            }
            SessionOutput::Answer { to_id, answer } => {
                if let Err(e) = self.send_signal(Some(to_id), SignalPayload::Answer(answer)).await {
                    self.report(e);
                }
            }
            SessionOutput::StateChanged(state) => self.set_peer_state(state),
            SessionOutput::Failed(e) => self.report(e),
        }
    }

    async fn on_peer_event(&mut self, tagged: TaggedPeerEvent) {
        if self.live_generation() != Some(tagged.generation) {
            log::debug!("dropping peer event from retired generation {}", tagged.generation);
            return;
        }

        match tagged.event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.send_signal(None, SignalPayload::IceCandidate(candidate)).await {
                    self.report(e);
                }
            }
            PeerEvent::ConnectionState(state) => {
                log::info!("peer connection {}", state);
                if let Some(session) = &self.session {
                    session.submit(SessionOp::ConnectionChanged(state));
                }
                self.notify(Notice::Connection(state));
            }
            PeerEvent::DataChannelOpen(label) => self.notify(Notice::DataChannelOpen { label }),
            PeerEvent::DataMessage(text) => self.notify(Notice::DataMessage { text }),
            PeerEvent::DataChannelClosed(label) => self.notify(Notice::DataChannelClosed { label }),
        }
    }

    /// Publishes a signal for the live call. Without a known recipient the
    /// message is dropped and counted.
    async fn send_signal(&mut self, to_id: Option<String>, payload: SignalPayload) -> SignalResult<()> {
        let call = self.lifecycle.active().ok_or(SignalError::NoActiveCall)?;
        let call_id = call.call_id.clone();
        let Some(to_id) = to_id.or_else(|| call.peer_id.clone()) else {
            self.dropped_outbound += 1;
            return Err(SignalError::UnknownPeer { call_id });
        };

        let destination = Destination::for_payload(&payload);
        let body = encode_signal(&SignalMessage {
            call_id,
            from_id: self.settings.local_id.clone(),
            to_id,
            payload,
        })?;
        self.bus
            .publish(&destination.path(&self.settings.app_prefix), body)
            .await
    }

    async fn publish_command(
        &self,
        destination: Destination,
        call_id: String,
        reason: Option<String>,
    ) -> SignalResult<()> {
        let body = encode_command(&CallCommand { call_id, reason })?;
        self.bus
            .publish(&destination.path(&self.settings.app_prefix), body)
            .await
    }

    fn current_call_id(&self) -> String {
        self.lifecycle
            .current()
            .map(|c| c.call_id.clone())
            .unwrap_or_default()
    }

    fn set_peer_state(&mut self, state: NegotiationState) {
        if self.peer_state == Some(state) {
            return;
        }
        self.peer_state = Some(state);
        let call_id = self
            .session
            .as_ref()
            .map(|s| s.call_id().to_string())
            .unwrap_or_default();
        self.notify(Notice::PeerState { call_id, state });
    }

    fn notify_status(&self) {
        if let Some(call) = self.lifecycle.current() {
            self.notify(Notice::CallStatus {
                call_id: call.call_id.clone(),
                status: call.status,
            });
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn report(&self, error: SignalError) {
        if error.is_silent() {
            log::debug!("{}", error);
            return;
        }
        log::warn!("{}", error);
        self.notify(Notice::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}
