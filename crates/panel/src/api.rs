//! Panel wire types and the [`PanelApi`] seam.
//!
//! Every endpoint answers with an envelope `{code, data, message}` where a
//! `code` other than 200 is a failure even on HTTP 200.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PanelError;

/// Success value of the envelope `code` field.
pub const CODE_OK: i64 = 200;

/// Response envelope shared by every panel endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Turn a non-200 `code` into [`PanelError::Api`].
    pub fn into_result(self) -> Result<Option<T>, PanelError> {
        if self.code != CODE_OK {
            return Err(PanelError::Api {
                code: self.code,
                message: self.message.unwrap_or_default(),
            });
        }
        Ok(self.data)
    }
}

/// A variable as stored on a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelEnv {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub remarks: Option<String>,
    /// `0` enabled, `1` disabled.
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PanelEnv {
    pub fn is_enabled(&self) -> bool {
        self.status == 0
    }
}

/// Body item for `POST /open/envs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEnv {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// Body for `PUT /open/envs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvUpdate {
    pub id: i64,
    pub name: String,
    pub value: String,
    pub remarks: String,
}

/// `data` of `GET /open/auth/token`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenData {
    pub token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Unix seconds at which the token stops working.
    #[serde(default)]
    pub expiration: Option<i64>,
}

/// Operations the submission workflow needs from one panel.
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Panel id this handle talks to.
    fn panel_id(&self) -> panelgate_core::types::DbId;

    async fn list_envs(&self) -> Result<Vec<PanelEnv>, PanelError>;

    async fn create_envs(&self, envs: &[NewEnv]) -> Result<Vec<PanelEnv>, PanelError>;

    async fn update_env(&self, update: &EnvUpdate) -> Result<PanelEnv, PanelError>;

    async fn enable_envs(&self, ids: &[i64]) -> Result<(), PanelError>;

    async fn disable_envs(&self, ids: &[i64]) -> Result<(), PanelError>;

    async fn delete_envs(&self, ids: &[i64]) -> Result<(), PanelError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
