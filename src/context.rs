//! Everything a UI component needs to mount reconciled entities.

use std::sync::Arc;

use crate::api_client::{HttpMutationClient, MutationClient};
use crate::config::SyncConfig;
use crate::credentials::CredentialProvider;
use crate::ws::SyncHandle;

#[derive(Clone)]
pub struct SyncContext {
    handle: SyncHandle,
    credentials: Arc<dyn CredentialProvider>,
    mutations: Arc<dyn MutationClient>,
}

impl SyncContext {
    pub fn new(
        handle: SyncHandle,
        credentials: Arc<dyn CredentialProvider>,
        mutations: Arc<dyn MutationClient>,
    ) -> Self {
        Self {
            handle,
            credentials,
            mutations,
        }
    }

    /// Confirmations go over HTTP to `config.api_url`.
    pub fn with_http(
        config: &SyncConfig,
        handle: SyncHandle,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let mutations = Arc::new(HttpMutationClient::new(
            config.api_url.clone(),
            Arc::clone(&credentials),
        ));
        Self::new(handle, credentials, mutations)
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn mutations(&self) -> &Arc<dyn MutationClient> {
        &self.mutations
    }
}
