//! Shared per-panel clients.
//!
//! [`PanelManager`] keeps one [`PanelClient`] per panel id so that every
//! concurrent submission against a panel shares its token state and refresh
//! coordination. A client is replaced when the panel's base URL changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use panelgate_core::types::DbId;
use tokio::sync::RwLock;

use crate::api::PanelApi;
use crate::client::{PanelClient, TokenRefresher};
use crate::error::PanelError;

/// What the manager needs to know to talk to a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelTarget {
    pub id: DbId,
    pub name: String,
    pub url: String,
    /// Last persisted token, if any.
    pub token: Option<String>,
    /// Unix seconds after which `token` stops working.
    pub token_expires_at: Option<i64>,
}

/// Resolves a panel description to a live API handle.
#[async_trait]
pub trait PanelConnector: Send + Sync {
    async fn connect(&self, target: &PanelTarget) -> Arc<dyn PanelApi>;
}

/// Cache of panel clients indexed by panel id.
pub struct PanelManager {
    clients: RwLock<HashMap<DbId, Arc<PanelClient>>>,
    http: reqwest::Client,
    refresher: Arc<dyn TokenRefresher>,
}

impl PanelManager {
    pub fn new(http: reqwest::Client, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            http,
            refresher,
        }
    }

    /// Build the shared HTTP client used for every panel call.
    pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, PanelError> {
        Ok(reqwest::Client::builder().timeout(timeout).build()?)
    }

    /// Return the cached client for `target`, creating or replacing it when
    /// needed.
    pub async fn client_for(&self, target: &PanelTarget) -> Arc<PanelClient> {
        let wanted_url = target.url.trim().trim_end_matches('/');
        if let Some(client) = self.clients.read().await.get(&target.id) {
            if client.base_url() == wanted_url {
                return Arc::clone(client);
            }
        }

        let mut clients = self.clients.write().await;
        // Another task may have created it while we waited for the write lock.
        if let Some(client) = clients.get(&target.id) {
            if client.base_url() == wanted_url {
                return Arc::clone(client);
            }
            tracing::info!(panel_id = target.id, url = %wanted_url, "Panel URL changed, replacing client");
        }

        let client = Arc::new(
            PanelClient::new(
                target.id,
                self.http.clone(),
                &target.url,
                target.token.clone().unwrap_or_default(),
                Some(Arc::clone(&self.refresher)),
            )
            .with_token_expiry(target.token_expires_at),
        );
        clients.insert(target.id, Arc::clone(&client));
        tracing::debug!(panel_id = target.id, name = %target.name, "Panel client created");
        client
    }
}

#[async_trait]
impl PanelConnector for PanelManager {
    async fn connect(&self, target: &PanelTarget) -> Arc<dyn PanelApi> {
        self.client_for(target).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
