//! One-shot SDP offer/answer exchange.
//!
//! The local offer is posted as a multipart field `sdp` to a per-agent
//! endpoint; the response body is the raw SDP answer. Any non-2xx response
//! is fatal for the attempt. There is no retry: a stale offer cannot be
//! renegotiated without a fresh peer connection.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use std::sync::Arc;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use crate::core::session::{SessionError, SessionResult};

const USER_AGENT: &str = concat!("waav-voice-client/", env!("CARGO_PKG_VERSION"));

/// SDP exchange seam.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Post `offer_sdp` and return the remote answer SDP.
    async fn exchange(&self, offer_sdp: &str) -> SessionResult<String>;
}

pub type SharedSignaling = Arc<dyn SignalingTransport>;

/// Build `{base}/{agent_id}/{path}`.
pub fn signaling_endpoint(base_url: &str, agent_id: &str, path: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        agent_id.trim_matches('/'),
        path.trim_start_matches('/')
    )
}

/// HTTP signaling against the agent platform.
pub struct HttpSignaling {
    http_client: Client,
    endpoint: String,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for HttpSignaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSignaling")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpSignaling {
    pub fn new(endpoint: impl Into<String>) -> SessionResult<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                SessionError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            token: None,
        })
    }

    /// Attach a bearer token to every exchange.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Zeroizing::new(token.into()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SignalingTransport for HttpSignaling {
    async fn exchange(&self, offer_sdp: &str) -> SessionResult<String> {
        if offer_sdp.trim().is_empty() {
            return Err(SessionError::Signaling("Local offer is empty".to_string()));
        }

        let form = Form::new().text("sdp", offer_sdp.to_string());
        let mut request = self.http_client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.as_str());
        }

        debug!(endpoint = %self.endpoint, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = request.send().await.map_err(|e| {
            error!("SDP exchange request failed: {e}");
            SessionError::Signaling(format!("Request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or(status.as_str());
            error!(status = status.as_u16(), "Signaling backend rejected offer");
            return Err(SessionError::Signaling(format!("Backend error: {reason}")));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| SessionError::Signaling(format!("Failed to read answer: {e}")))?;

        info!(answer_len = answer.len(), "Received SDP answer");
        Ok(answer)
    }
}
