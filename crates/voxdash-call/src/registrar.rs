//! Turns a request to test an agent into a short-lived session credential.

use crate::config::CallConfig;
use crate::error::RegistrationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use voxdash_types::Credential;

/// Longest slice of an error response body kept in `RegistrationError::Status`.
const MAX_ERROR_BODY_BYTES: usize = 512;

/// A credential issued by the backend for one session.
#[derive(Debug, Clone)]
pub struct Registration {
    pub credential: Credential,
    /// Backend call id, or a generated UUID when the backend omits one.
    pub session_id: String,
}

/// Backend call registration.
///
/// Implementations perform exactly one outbound request per call and never
/// retry on their own.
#[async_trait]
pub trait CallRegistrar: Send + Sync {
    async fn register(&self, agent_id: &str) -> Result<Registration, RegistrationError>;
}

#[derive(Serialize)]
struct CreateCallRequest<'a> {
    agent_id: &'a str,
}

#[derive(Deserialize)]
struct CreateCallResponse {
    access_token: String,
    #[serde(default)]
    call_id: Option<String>,
}

/// [`CallRegistrar`] backed by an authenticated HTTP `POST`.
#[derive(Clone)]
pub struct HttpCallRegistrar {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl fmt::Debug for HttpCallRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCallRegistrar")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

impl HttpCallRegistrar {
    /// Builds a registrar whose HTTP client enforces the configured
    /// registration timeout.
    pub fn new(config: &CallConfig) -> Result<Self, RegistrationError> {
        let client = reqwest::Client::builder()
            .timeout(config.register_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &CallConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CallRegistrar for HttpCallRegistrar {
    async fn register(&self, agent_id: &str) -> Result<Registration, RegistrationError> {
        if agent_id.trim().is_empty() {
            return Err(RegistrationError::InvalidAgent);
        }
        if self.endpoint.is_empty() {
            return Err(RegistrationError::NotConfigured);
        }

        debug!(agent_id, endpoint = %self.endpoint, "registering test call");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&CreateCallRequest { agent_id });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrationError::Status {
                status: status.as_u16(),
                body: truncate_body(body.trim(), MAX_ERROR_BODY_BYTES).to_string(),
            });
        }

        let body: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| RegistrationError::MalformedResponse(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(RegistrationError::MalformedResponse(
                "access_token is empty".to_string(),
            ));
        }

        let session_id = body
            .call_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            agent_id,
            session_id = %session_id,
            token_len = body.access_token.len(),
            "test call registered"
        );

        Ok(Registration {
            credential: Credential::new(body.access_token),
            session_id,
        })
    }
}

fn truncate_body(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
