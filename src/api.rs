//! Call-creation collaborator: one request/response that yields a call id.

use crate::errors::{SignalError, SignalResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCall {
    pub call_id: String,
    pub peer_id: Option<String>,
}

#[async_trait]
pub trait CallApi: Send + Sync {
    async fn create_call(&self, target_id: &str, category: &str) -> SignalResult<CreatedCall>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallRequest<'a> {
    callee_id: &'a str,
    call_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallResponse {
    #[serde(alias = "id")]
    call_id: String,
    #[serde(default)]
    callee_id: Option<String>,
}

/// `POST {base_url}/calls` with the harness bearer credential.
pub struct HttpCallApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCallApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/calls", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CallApi for HttpCallApi {
    async fn create_call(&self, target_id: &str, category: &str) -> SignalResult<CreatedCall> {
        log::info!("Creating {} call to {}", category, target_id);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.token)
            .json(&CreateCallRequest {
                callee_id: target_id,
                call_type: category,
            })
            .send()
            .await
            .map_err(|e| SignalError::CallApi(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SignalError::CallApi(format!("{}: {}", status, text)));
        }

        let body: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| SignalError::CallApi(format!("malformed response: {}", e)))?;

        Ok(CreatedCall {
            call_id: body.call_id,
            peer_id: body.callee_id.or_else(|| Some(target_id.to_string())),
        })
    }
}
