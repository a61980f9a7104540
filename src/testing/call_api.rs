use crate::api::{CallApi, CreatedCall};
use crate::errors::{SignalError, SignalResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Call creation that hands out preset call ids (`c1`, `c2`, ... by default).
#[derive(Default)]
pub struct ScriptedCallApi {
    ids: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<(String, String)>>,
    counter: Mutex<u32>,
    fail_next: Mutex<Option<String>>,
}

impl ScriptedCallApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Makes the next request fail with a `CallApi` error carrying `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// `(target, category)` of every request so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CallApi for ScriptedCallApi {
    async fn create_call(&self, target_id: &str, category: &str) -> SignalResult<CreatedCall> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((target_id.to_string(), category.to_string()));

        if let Some(reason) = self.fail_next.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(SignalError::CallApi(reason));
        }

        let preset = self.ids.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let call_id = preset.unwrap_or_else(|| {
            let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            format!("c{}", *counter)
        });
        Ok(CreatedCall {
            call_id,
            peer_id: Some(target_id.to_string()),
        })
    }
}
