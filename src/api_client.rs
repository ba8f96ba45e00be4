//! Request layer for confirming optimistic mutations.

use std::sync::Arc;

use async_trait::async_trait;
use feedsync_shared::{EntityId, RequestError, Snapshot};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::credentials::CredentialProvider;

/// One confirmation request: `POST {api}/api/{feature}/{entity}/{action}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub feature: &'static str,
    pub entity_id: EntityId,
    pub action: &'static str,
    pub member: Option<String>,
}

#[derive(Debug, Serialize)]
struct MutationBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    member: Option<&'a str>,
}

/// Resolves a mutation to the server's authoritative snapshot.
#[async_trait]
pub trait MutationClient: Send + Sync {
    async fn mutate(&self, request: MutationRequest) -> Result<Snapshot, RequestError>;
}

#[derive(Clone)]
pub struct HttpMutationClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpMutationClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    /// Path segments are percent-encoded, so ids may contain `/` or spaces.
    fn url(&self, request: &MutationRequest) -> Result<Url, RequestError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RequestError::Network(format!("invalid API base {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| RequestError::Network(format!("API base cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", request.feature, request.entity_id.as_str(), request.action]);
        Ok(url)
    }
}

#[async_trait]
impl MutationClient for HttpMutationClient {
    async fn mutate(&self, request: MutationRequest) -> Result<Snapshot, RequestError> {
        let identity = self
            .credentials
            .current_identity()
            .ok_or_else(|| RequestError::AuthExpired("not signed in".to_string()))?;
        let url = self.url(&request)?;
        crate::log_debug!("POST {}", url);

        let resp = self
            .client
            .post(url)
            .bearer_auth(&identity.token)
            .json(&MutationBody {
                member: request.member.as_deref(),
            })
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| RequestError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(RequestError::from_status(status, &text));
        }

        // No body means "accepted, nothing authoritative to report".
        if text.trim().is_empty() {
            return Ok(Snapshot::default());
        }
        serde_json::from_str(&text).map_err(|e| RequestError::Server {
            status,
            message: format!("invalid snapshot: {e}"),
        })
    }
}
