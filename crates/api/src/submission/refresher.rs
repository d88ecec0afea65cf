//! Token refresh backed by the panel's stored client credentials.

use std::sync::Arc;

use async_trait::async_trait;
use panelgate_core::types::DbId;
use panelgate_panel::auth::fetch_token;
use panelgate_panel::{PanelError, TokenData, TokenRefresher};

use super::store::SubmissionStore;

/// Loads a panel's credentials, exchanges them for a token and persists the
/// result before handing it back to the client.
pub struct StoreTokenRefresher {
    store: Arc<dyn SubmissionStore>,
    http: reqwest::Client,
}

impl StoreTokenRefresher {
    pub fn new(store: Arc<dyn SubmissionStore>, http: reqwest::Client) -> Self {
        Self { store, http }
    }
}

#[async_trait]
impl TokenRefresher for StoreTokenRefresher {
    async fn refresh(&self, panel_id: DbId) -> Result<TokenData, PanelError> {
        let panel = self
            .store
            .find_panel(panel_id)
            .await
            .map_err(|e| PanelError::RefreshFailed(format!("cannot load panel: {e}")))?
            .ok_or_else(|| PanelError::RefreshFailed(format!("panel {panel_id} no longer exists")))?;

        let issued = fetch_token(&self.http, &panel.url, &panel.client_id, &panel.client_secret)
            .await
            .map_err(|e| PanelError::RefreshFailed(e.to_string()))?;

        let saved = self
            .store
            .save_panel_token(panel_id, &issued.token, issued.expiration)
            .await
            .map_err(|e| PanelError::RefreshFailed(format!("cannot persist token: {e}")))?;
        if !saved {
            return Err(PanelError::RefreshFailed(format!(
                "panel {panel_id} no longer exists"
            )));
        }

        tracing::debug!(panel_id, expires_at = ?issued.expiration, "Panel token persisted");
        Ok(issued)
    }
}
