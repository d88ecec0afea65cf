//! REST client for one panel with transparent token recovery.
//!
//! Every call is sent with the current bearer token. When the panel answers
//! HTTP 401 the client refreshes the token through its [`TokenRefresher`]
//! and replays the original request exactly once. Concurrent calls against
//! the same panel coordinate through a small state block:
//!
//! * while a refresh is running, other 401s fail fast with
//!   [`PanelError::RefreshInProgress`]
//! * a 401 for a token that has already been replaced skips the refresh and
//!   replays with the new token
//!
//! A token whose reported expiry is at most [`EXPIRY_MARGIN_SECS`] away is
//! refreshed before the request instead of waiting for the 401.
//!
//! Transport errors are returned as-is; retrying reads is the caller's job
//! (see [`crate::retry`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use panelgate_core::types::DbId;
use reqwest::{Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;

use crate::api::{Envelope, EnvUpdate, NewEnv, PanelApi, PanelEnv, TokenData};
use crate::error::PanelError;
use crate::PANEL_USER_AGENT;

/// Seconds before the reported expiry at which a token counts as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Obtains a fresh token for a panel and persists it durably.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, panel_id: DbId) -> Result<TokenData, PanelError>;
}

struct TokenState {
    token: String,
    /// Unix seconds reported with the token, if any.
    expires_at: Option<i64>,
    /// Bumped on every successful refresh.
    generation: u64,
    refreshing: bool,
}

/// Clears `refreshing` on every exit path of a refresh.
struct RefreshReset<'a> {
    state: &'a Mutex<TokenState>,
}

impl Drop for RefreshReset<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshing = false;
    }
}

/// HTTP client for a single panel.
pub struct PanelClient {
    panel_id: DbId,
    http: reqwest::Client,
    base_url: String,
    state: Mutex<TokenState>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl PanelClient {
    /// Create a client for the panel at `base_url`.
    ///
    /// * `token` - last known bearer token; empty forces a refresh on the
    ///   first call.
    /// * `refresher` - `None` turns every 401 into [`PanelError::Unauthorized`].
    pub fn new(
        panel_id: DbId,
        http: reqwest::Client,
        base_url: &str,
        token: impl Into<String>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Self {
        Self {
            panel_id,
            http,
            base_url: normalize_base_url(base_url),
            state: Mutex::new(TokenState {
                token: token.into(),
                expires_at: None,
                generation: 0,
                refreshing: false,
            }),
            refresher,
        }
    }

    /// Record when the initial token stops working (unix seconds).
    pub fn with_token_expiry(self, expires_at: Option<i64>) -> Self {
        self.lock_state().expires_at = expires_at;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token_expires_at(&self) -> Option<i64> {
        self.lock_state().expires_at
    }

    /// Token currently used for requests.
    pub fn token(&self) -> String {
        self.lock_state().token.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- request pipeline ----

    /// Send a request and decode the envelope, recovering from one 401.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, PanelError> {
        let (mut token, mut generation, expired) = {
            let state = self.lock_state();
            (state.token.clone(), state.generation, is_expired(state.expires_at))
        };

        if expired && self.refresher.is_some() {
            match self.recover_token(generation, "Panel token expired, refreshing").await {
                Ok(fresh) => {
                    token = fresh;
                    generation = self.lock_state().generation;
                }
                // Someone else is refreshing; the 401 path covers a stale token.
                Err(PanelError::RefreshInProgress) => {}
                Err(e) => return Err(e),
            }
        }

        let response = self.dispatch(&method, path, body.as_ref(), &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::parse_envelope(response).await;
        }

        let token = self
            .recover_token(generation, "Panel returned 401, refreshing token")
            .await?;
        tracing::debug!(panel_id = self.panel_id, path, "Replaying request with refreshed token");
        let response = self.dispatch(&method, path, body.as_ref(), &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(panel_id = self.panel_id, path, "Panel rejected refreshed token");
            return Err(PanelError::Unauthorized);
        }
        Self::parse_envelope(response).await
    }

    /// Produce a replacement for the token read at `seen_generation`.
    async fn recover_token(&self, seen_generation: u64, reason: &str) -> Result<String, PanelError> {
        let Some(refresher) = self.refresher.as_ref() else {
            return Err(PanelError::Unauthorized);
        };

        {
            let mut state = self.lock_state();
            if state.refreshing {
                return Err(PanelError::RefreshInProgress);
            }
            if state.generation != seen_generation {
                return Ok(state.token.clone());
            }
            state.refreshing = true;
        }
        let _reset = RefreshReset { state: &self.state };

        tracing::info!(panel_id = self.panel_id, "{reason}");
        let issued = refresher.refresh(self.panel_id).await.map_err(|e| {
            tracing::error!(panel_id = self.panel_id, error = %e, "Panel token refresh failed");
            match e {
                PanelError::RefreshFailed(reason) => PanelError::RefreshFailed(reason),
                other => PanelError::RefreshFailed(other.to_string()),
            }
        })?;

        {
            let mut state = self.lock_state();
            state.token = issued.token.clone();
            state.expires_at = issued.expiration;
            state.generation += 1;
        }
        tracing::info!(panel_id = self.panel_id, expires_at = ?issued.expiration, "Panel token refreshed");
        Ok(issued.token)
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<reqwest::Response, PanelError> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, PANEL_USER_AGENT);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`PanelError::Http`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PanelError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PanelError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Option<T>, PanelError> {
        let response = Self::ensure_success(response).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| PanelError::Decode(e.to_string()))?;
        envelope.into_result()
    }

    async fn call_ids(&self, method: Method, path: &str, ids: &[i64]) -> Result<(), PanelError> {
        let body = serde_json::to_value(ids).map_err(|e| PanelError::Decode(e.to_string()))?;
        self.call::<IgnoredAny>(method, path, Some(body)).await?;
        Ok(())
    }
}

/// Whether a token with this expiry should be replaced before use. Panels
/// that report no expiry, or zero, are trusted until they answer 401.
fn is_expired(expires_at: Option<i64>) -> bool {
    expires_at
        .filter(|at| *at > 0)
        .is_some_and(|at| chrono::Utc::now().timestamp() >= at - EXPIRY_MARGIN_SECS)
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[async_trait]
impl PanelApi for PanelClient {
    fn panel_id(&self) -> DbId {
        self.panel_id
    }

    async fn list_envs(&self) -> Result<Vec<PanelEnv>, PanelError> {
        Ok(self
            .call::<Vec<PanelEnv>>(Method::GET, "/open/envs", None)
            .await?
            .unwrap_or_default())
    }

    async fn create_envs(&self, envs: &[NewEnv]) -> Result<Vec<PanelEnv>, PanelError> {
        let body = serde_json::to_value(envs).map_err(|e| PanelError::Decode(e.to_string()))?;
        Ok(self
            .call::<Vec<PanelEnv>>(Method::POST, "/open/envs", Some(body))
            .await?
            .unwrap_or_default())
    }

    async fn update_env(&self, update: &EnvUpdate) -> Result<PanelEnv, PanelError> {
        let body = serde_json::to_value(update).map_err(|e| PanelError::Decode(e.to_string()))?;
        self.call::<PanelEnv>(Method::PUT, "/open/envs", Some(body))
            .await?
            .ok_or_else(|| PanelError::Decode("update response carried no record".to_string()))
    }

    async fn enable_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        self.call_ids(Method::PUT, "/open/envs/enable", ids).await
    }

    async fn disable_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        self.call_ids(Method::PUT, "/open/envs/disable", ids).await
    }

    async fn delete_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        self.call_ids(Method::DELETE, "/open/envs", ids).await
    }
}
