//! Backend dispatch.
//!
//! The gateway talks to concrete model providers through the
//! [`ModelBackend`] trait. Production uses [`HttpBackend`], a thin
//! reqwest client posting an OpenAI-style chat payload to the model's
//! configured endpoint; tests swap in scripted backends. Per-attempt
//! timeouts are enforced by the caller via `tokio::time::timeout`, so a
//! backend only has to do the I/O.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::ModelProfile;
use crate::RouteRequest;

/// A completed backend call.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Model output text.
    pub content: String,
    /// Prompt tokens as reported (or estimated) by the backend.
    pub tokens_in: u64,
    /// Completion tokens as reported (or estimated) by the backend.
    pub tokens_out: u64,
}

/// Why a single dispatch attempt failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Transport-level failure reaching the endpoint.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("backend returned status {status}")]
    BadStatus {
        /// HTTP status code from the backend.
        status: u16,
    },
    /// The response body did not parse.
    #[error("malformed backend response: {0}")]
    BadResponse(String),
}

/// A model provider the gateway can dispatch to.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the request to `model` and await its completion.
    async fn dispatch(
        &self,
        model: &ModelProfile,
        request: &RouteRequest,
    ) -> Result<DispatchOutcome, DispatchError>;
}

// ── HTTP backend ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WirePayload<'a> {
    model: &'a str,
    messages: &'a [crate::ChatMessage],
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

/// Dispatches over HTTP with an OpenAI-style chat-completions payload.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Backend over a shared connection pool.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn dispatch(
        &self,
        model: &ModelProfile,
        request: &RouteRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let payload = WirePayload {
            model: model.id.as_str(),
            messages: &request.messages,
        };

        debug!(model = %model.id, endpoint = %model.endpoint_url, "dispatching");
        let response = self
            .client
            .post(&model.endpoint_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::BadStatus {
                status: status.as_u16(),
            });
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::BadResponse(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DispatchError::BadResponse("no choices in response".to_string()))?;

        let tokens_in = if body.usage.prompt_tokens > 0 {
            body.usage.prompt_tokens
        } else {
            request.token_estimate()
        };
        let tokens_out = if body.usage.completion_tokens > 0 {
            body.usage.completion_tokens
        } else {
            (content.len() / 4) as u64
        };

        Ok(DispatchOutcome {
            content,
            tokens_in,
            tokens_out,
        })
    }
}

// ── Echo backend ───────────────────────────────────────────────────────────

/// Loopback backend for local development and smoke tests: echoes the
/// latest user prompt without any network I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoBackend;

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn dispatch(
        &self,
        model: &ModelProfile,
        request: &RouteRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let prompt = request.latest_user_prompt().unwrap_or("");
        let content = format!("[{}] {prompt}", model.id);
        let tokens_in = request.token_estimate();
        let tokens_out = (content.len() / 4) as u64;
        Ok(DispatchOutcome {
            content,
            tokens_in,
            tokens_out,
        })
    }
}
