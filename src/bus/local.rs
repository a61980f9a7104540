//! In-process stand-in for the signaling backend.
//!
//! A [`LocalHub`] plays the server: it knows every connected identity, keeps a
//! registry of calls and routes publishes the way the real backend does.
//! `webrtc.*` bodies are forwarded verbatim to the `toUserId`'s signal channel,
//! `call.*` commands become the matching notification for the other party.

use crate::api::{CallApi, CreatedCall};
use crate::bus::{BusEvent, MessageBus};
use crate::config::BusConfig;
use crate::errors::{SignalError, SignalResult};
use crate::signaling::codec::{
    decode_command, decode_signal, encode_notification, CallNotification, Destination,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Endpoint {
    events: mpsc::UnboundedSender<BusEvent>,
    subscriptions: HashSet<String>,
    online: bool,
}

#[derive(Debug, Clone)]
struct CallParties {
    caller: String,
    callee: String,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, Endpoint>,
    calls: HashMap<String, CallParties>,
}

pub struct LocalHub {
    app_prefix: String,
    call_channel: String,
    signal_channel: String,
    state: Mutex<HubState>,
}

impl LocalHub {
    pub fn new(routes: &BusConfig) -> Arc<Self> {
        Arc::new(Self {
            app_prefix: routes.app_prefix.clone(),
            call_channel: routes.call_channel.clone(),
            signal_channel: routes.signal_channel.clone(),
            state: Mutex::new(HubState::default()),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(&BusConfig::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `user_id` and returns its bus plus the event stream it reads.
    pub fn connect(
        self: &Arc<Self>,
        user_id: impl Into<String>,
    ) -> (Arc<LocalBus>, mpsc::UnboundedReceiver<BusEvent>) {
        let user_id = user_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().endpoints.insert(
            user_id.clone(),
            Endpoint {
                events: tx,
                subscriptions: HashSet::new(),
                online: true,
            },
        );
        log::debug!("hub: {} connected", user_id);
        let bus = Arc::new(LocalBus {
            hub: Arc::clone(self),
            user_id,
        });
        (bus, rx)
    }

    /// Creates a call between two connected identities and notifies the callee.
    pub fn place_call(&self, caller: &str, callee: &str) -> SignalResult<String> {
        let call_id = Uuid::new_v4().to_string();
        let mut state = self.state();
        if !state.endpoints.contains_key(callee) {
            return Err(SignalError::CallApi(format!("user {} is not connected", callee)));
        }
        state.calls.insert(
            call_id.clone(),
            CallParties {
                caller: caller.to_string(),
                callee: callee.to_string(),
            },
        );
        let notification = CallNotification::IncomingCall {
            call_id: call_id.clone(),
            from_id: Some(caller.to_string()),
        };
        deliver(&mut state, callee, &self.call_channel, encode_notification(&notification)?);
        log::info!("hub: call {} from {} to {}", call_id, caller, callee);
        Ok(call_id)
    }

    /// Simulates losing the transport for `user_id`. Subscriptions are
    /// dropped, as a broker would on disconnect.
    pub fn disconnect(&self, user_id: &str) {
        let mut state = self.state();
        if let Some(endpoint) = state.endpoints.get_mut(user_id) {
            endpoint.online = false;
            endpoint.subscriptions.clear();
            let _ = endpoint.events.send(BusEvent::Disconnected {
                reason: "connection reset".to_string(),
            });
        }
    }

    pub fn reconnect(&self, user_id: &str) {
        let mut state = self.state();
        if let Some(endpoint) = state.endpoints.get_mut(user_id) {
            endpoint.online = true;
            let _ = endpoint.events.send(BusEvent::Reconnected);
        }
    }

    pub fn subscriptions(&self, user_id: &str) -> Vec<String> {
        let state = self.state();
        let mut subs: Vec<String> = state
            .endpoints
            .get(user_id)
            .map(|e| e.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        subs.sort();
        subs
    }

    fn subscribe(&self, user_id: &str, destination: &str) -> SignalResult<()> {
        let mut state = self.state();
        let endpoint = online_endpoint(&mut state, user_id)?;
        endpoint.subscriptions.insert(destination.to_string());
        Ok(())
    }

    fn route(&self, from: &str, destination: &str, body: String) -> SignalResult<()> {
        let mut state = self.state();
        online_endpoint(&mut state, from)?;

        let name = destination
            .strip_prefix(self.app_prefix.trim_end_matches('/'))
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(destination);
        let Some(dest) = Destination::from_name(name) else {
            return Err(SignalError::Transport(format!("no route for {}", destination)));
        };

        match dest {
            Destination::WebrtcOffer | Destination::WebrtcAnswer | Destination::WebrtcIce => {
                let to_id = decode_signal(&body)?.to_id;
                deliver(&mut state, &to_id, &self.signal_channel, body);
            }
            Destination::CallAccept | Destination::CallReject | Destination::CallEnd => {
                let command = decode_command(&body)?;
                let Some(parties) = state.calls.get(&command.call_id).cloned() else {
                    log::debug!("hub: {} for unknown call {}", dest, command.call_id);
                    return Ok(());
                };
                let other = if parties.caller == from {
                    parties.callee
                } else {
                    parties.caller
                };
                let call_id = command.call_id;
                let notification = match dest {
                    Destination::CallAccept => CallNotification::CallAccepted { call_id },
                    Destination::CallReject => CallNotification::CallRejected {
                        call_id,
                        reason: command.reason,
                    },
                    _ => CallNotification::CallEnded { call_id },
                };
                if dest != Destination::CallAccept {
                    state.calls.remove(notification.call_id());
                }
                deliver(&mut state, &other, &self.call_channel, encode_notification(&notification)?);
            }
        }
        Ok(())
    }
}

fn online_endpoint<'a>(state: &'a mut HubState, user_id: &str) -> SignalResult<&'a mut Endpoint> {
    match state.endpoints.get_mut(user_id) {
        Some(endpoint) if endpoint.online => Ok(endpoint),
        Some(_) => Err(SignalError::Transport(format!("{} is disconnected", user_id))),
        None => Err(SignalError::Transport(format!("{} is not connected", user_id))),
    }
}

fn deliver(state: &mut HubState, to: &str, channel: &str, body: String) {
    match state.endpoints.get(to) {
        Some(endpoint) if endpoint.online && endpoint.subscriptions.contains(channel) => {
            let _ = endpoint.events.send(BusEvent::Message {
                destination: channel.to_string(),
                body,
            });
        }
        _ => log::debug!("hub: dropping message for {} on {}", to, channel),
    }
}

/// One identity's connection to a [`LocalHub`].
pub struct LocalBus {
    hub: Arc<LocalHub>,
    user_id: String,
}

impl LocalBus {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn subscribe(&self, destination: &str) -> SignalResult<()> {
        self.hub.subscribe(&self.user_id, destination)
    }

    async fn publish(&self, destination: &str, body: String) -> SignalResult<()> {
        self.hub.route(&self.user_id, destination, body)
    }
}

/// Call creation against a [`LocalHub`].
pub struct LocalCallApi {
    hub: Arc<LocalHub>,
    caller_id: String,
}

impl LocalCallApi {
    pub fn new(hub: Arc<LocalHub>, caller_id: impl Into<String>) -> Self {
        Self {
            hub,
            caller_id: caller_id.into(),
        }
    }
}

#[async_trait]
impl CallApi for LocalCallApi {
    async fn create_call(&self, target_id: &str, category: &str) -> SignalResult<CreatedCall> {
        log::debug!("hub: {} call requested by {}", category, self.caller_id);
        let call_id = self.hub.place_call(&self.caller_id, target_id)?;
        Ok(CreatedCall {
            call_id,
            peer_id: Some(target_id.to_string()),
        })
    }
}
