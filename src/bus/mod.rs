//! Message bus collaborator.
//!
//! The signaling core only needs two things from the bus: subscribe to a
//! destination and publish a body to a destination. Inbound traffic and
//! connectivity changes are delivered as [`BusEvent`]s on the channel each
//! implementation hands out when it is constructed.

pub mod local;
pub mod stomp;

use crate::errors::SignalResult;
use async_trait::async_trait;

pub use local::{LocalBus, LocalCallApi, LocalHub};
pub use stomp::{StompBus, StompFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Message { destination: String, body: String },
    Disconnected { reason: String },
    Reconnected,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, destination: &str) -> SignalResult<()>;
    async fn publish(&self, destination: &str, body: String) -> SignalResult<()>;
}
