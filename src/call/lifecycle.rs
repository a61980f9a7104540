use crate::check_invariant;
use crate::errors::{SignalError, SignalResult};
use crate::invariant::{SINGLE_LIVE_CALL, TERMINAL_IS_FINAL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Created,
    Accepted,
    Rejected,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Ended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Created => "CREATED",
            CallStatus::Accepted => "ACCEPTED",
            CallStatus::Rejected => "REJECTED",
            CallStatus::Ended => "ENDED",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle actions, used when reporting a refused transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    Create,
    Accept,
    Reject,
    End,
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallAction::Create => "create",
            CallAction::Accept => "accept",
            CallAction::Reject => "reject",
            CallAction::End => "end",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: String,
    pub local_id: String,
    pub peer_id: Option<String>,
    pub role: CallRole,
    pub status: CallStatus,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of [`CallLifecycle::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// The call moved to `ENDED` now.
    Ended,
    /// The call was already terminal; nothing changed.
    AlreadyTerminal,
}

/// Holds the single call session and validates every status change.
///
/// A terminal session is kept around so that a late `end()` stays a no-op and
/// so that signals for it keep failing the active-call check.
#[derive(Debug)]
pub struct CallLifecycle {
    local_id: String,
    current: Option<CallSession>,
}

impl CallLifecycle {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            current: None,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn current(&self) -> Option<&CallSession> {
        self.current.as_ref()
    }

    /// The live (non-terminal) session, if any.
    pub fn active(&self) -> Option<&CallSession> {
        self.current.as_ref().filter(|s| !s.status.is_terminal())
    }

    pub fn active_call_id(&self) -> Option<&str> {
        self.active().map(|s| s.call_id.as_str())
    }

    pub fn status(&self) -> Option<CallStatus> {
        self.current.as_ref().map(|s| s.status)
    }

    /// Starts an outgoing call once the call-creation collaborator returned an id.
    pub fn create(
        &mut self,
        call_id: impl Into<String>,
        peer_id: Option<String>,
    ) -> SignalResult<&CallSession> {
        self.install(call_id.into(), peer_id, CallRole::Caller)
    }

    pub fn on_incoming(
        &mut self,
        call_id: impl Into<String>,
        from_id: Option<String>,
    ) -> SignalResult<&CallSession> {
        self.install(call_id.into(), from_id, CallRole::Callee)
    }

    fn install(
        &mut self,
        call_id: String,
        peer_id: Option<String>,
        role: CallRole,
    ) -> SignalResult<&CallSession> {
        if let Some(live) = self.active() {
            return Err(SignalError::CallInProgress {
                call_id: live.call_id.clone(),
            });
        }

        log::info!("call {} created as {:?} (peer {:?})", call_id, role, peer_id);
        let session = CallSession {
            call_id,
            local_id: self.local_id.clone(),
            peer_id,
            role,
            status: CallStatus::Created,
            reject_reason: None,
            created_at: Utc::now(),
        };
        check_invariant!(self.active().is_none(), SINGLE_LIVE_CALL, "CallLifecycle::install");
        Ok(&*self.current.insert(session))
    }

    /// Records the peer identity when it was not known at creation.
    pub fn learn_peer(&mut self, peer_id: &str) {
        if let Some(session) = self.current.as_mut().filter(|s| !s.status.is_terminal()) {
            if session.peer_id.is_none() {
                log::debug!("call {} learned peer {}", session.call_id, peer_id);
                session.peer_id = Some(peer_id.to_string());
            }
        }
    }

    pub fn accept(&mut self) -> SignalResult<&CallSession> {
        self.transition(CallAction::Accept, CallStatus::Accepted, None)
    }

    pub fn reject(&mut self, reason: Option<String>) -> SignalResult<&CallSession> {
        self.transition(CallAction::Reject, CallStatus::Rejected, reason)
    }

    fn transition(
        &mut self,
        action: CallAction,
        next: CallStatus,
        reason: Option<String>,
    ) -> SignalResult<&CallSession> {
        let session = self.current.as_mut().ok_or(SignalError::NoActiveCall)?;
        if session.status != CallStatus::Created {
            return Err(SignalError::InvalidTransition {
                status: session.status,
                action,
            });
        }

        check_invariant!(
            !session.status.is_terminal(),
            TERMINAL_IS_FINAL,
            "CallLifecycle::transition"
        );
        log::info!("call {}: {} -> {}", session.call_id, session.status, next);
        session.status = next;
        session.reject_reason = reason;
        Ok(&*session)
    }

    /// Ends the live call. Ending a terminal call is a no-op so that a local
    /// hang-up and a remote `CALL_ENDED` may both arrive.
    pub fn end(&mut self) -> SignalResult<EndOutcome> {
        let session = self.current.as_mut().ok_or(SignalError::NoActiveCall)?;
        if session.status.is_terminal() {
            log::debug!("call {} already {}", session.call_id, session.status);
            return Ok(EndOutcome::AlreadyTerminal);
        }

        check_invariant!(
            !session.status.is_terminal(),
            TERMINAL_IS_FINAL,
            "CallLifecycle::end"
        );
        log::info!("call {}: {} -> ENDED", session.call_id, session.status);
        session.status = CallStatus::Ended;
        Ok(EndOutcome::Ended)
    }
}
