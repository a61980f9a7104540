use crate::bus::MessageBus;
use crate::errors::{SignalError, SignalResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub destination: String,
    pub body: String,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Bus that keeps every subscribe and publish for later assertions.
#[derive(Default)]
pub struct RecordingBus {
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<Published>>,
    offline: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.destination == destination)
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// While offline every publish fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn subscribe(&self, destination: &str) -> SignalResult<()> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(destination.to_string());
        Ok(())
    }

    async fn publish(&self, destination: &str, body: String) -> SignalResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SignalError::Transport("bus offline".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Published {
                destination: destination.to_string(),
                body,
            });
        Ok(())
    }
}
