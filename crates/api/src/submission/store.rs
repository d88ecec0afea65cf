//! Persistence seam of the submission workflow.
//!
//! [`SubmissionStore`] lists exactly the reads and writes the workflow
//! performs. [`PgSubmissionStore`] forwards them to the repositories; tests
//! substitute an in-memory store.

use async_trait::async_trait;
use panelgate_core::types::DbId;
use panelgate_db::models::environment::Environment;
use panelgate_db::models::panel::Panel;
use panelgate_db::models::plugin::{CreatePluginExecutionLog, PluginBinding};
use panelgate_db::models::quota_key::QuotaKey;
use panelgate_db::repositories::{
    EnvironmentRepo, PanelRepo, PluginExecutionLogRepo, PluginRepo, QuotaKeyRepo,
};
use panelgate_db::DbPool;

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Round trip to the backing database.
    async fn health_check(&self) -> Result<(), sqlx::Error>;

    async fn find_enabled_environment(&self, id: DbId) -> Result<Option<Environment>, sqlx::Error>;

    /// Every enabled environment, newest first.
    async fn enabled_environments(&self) -> Result<Vec<Environment>, sqlx::Error>;

    /// Enabled panels bound to an environment, in binding order.
    async fn enabled_panels(&self, environment_id: DbId) -> Result<Vec<Panel>, sqlx::Error>;

    async fn find_panel(&self, id: DbId) -> Result<Option<Panel>, sqlx::Error>;

    /// Persist a refreshed panel token and its expiry. Returns whether the
    /// panel still exists.
    async fn save_panel_token(
        &self,
        panel_id: DbId,
        token: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, sqlx::Error>;

    async fn increment_panel_usage(&self, panel_id: DbId) -> Result<(), sqlx::Error>;

    async fn find_quota_key(&self, key: &str) -> Result<Option<QuotaKey>, sqlx::Error>;

    /// Conditionally subtract `cost` uses. `None` when the key is disabled,
    /// missing, or short of balance.
    async fn deduct_quota(&self, key: &str, cost: i32) -> Result<Option<i32>, sqlx::Error>;

    async fn enabled_plugin_bindings(
        &self,
        environment_id: DbId,
    ) -> Result<Vec<PluginBinding>, sqlx::Error>;

    async fn record_plugin_execution(
        &self,
        log: &CreatePluginExecutionLog,
    ) -> Result<(), sqlx::Error>;
}

/// [`SubmissionStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: DbPool,
}

impl PgSubmissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn health_check(&self) -> Result<(), sqlx::Error> {
        panelgate_db::health_check(&self.pool).await
    }

    async fn find_enabled_environment(&self, id: DbId) -> Result<Option<Environment>, sqlx::Error> {
        EnvironmentRepo::find_enabled(&self.pool, id).await
    }

    async fn enabled_environments(&self) -> Result<Vec<Environment>, sqlx::Error> {
        EnvironmentRepo::list_enabled(&self.pool).await
    }

    async fn enabled_panels(&self, environment_id: DbId) -> Result<Vec<Panel>, sqlx::Error> {
        EnvironmentRepo::list_enabled_panels(&self.pool, environment_id).await
    }

    async fn find_panel(&self, id: DbId) -> Result<Option<Panel>, sqlx::Error> {
        PanelRepo::find_by_id(&self.pool, id).await
    }

    async fn save_panel_token(
        &self,
        panel_id: DbId,
        token: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        PanelRepo::update_token(&self.pool, panel_id, token, expires_at).await
    }

    async fn increment_panel_usage(&self, panel_id: DbId) -> Result<(), sqlx::Error> {
        PanelRepo::increment_usage(&self.pool, panel_id).await
    }

    async fn find_quota_key(&self, key: &str) -> Result<Option<QuotaKey>, sqlx::Error> {
        QuotaKeyRepo::find_by_key(&self.pool, key).await
    }

    async fn deduct_quota(&self, key: &str, cost: i32) -> Result<Option<i32>, sqlx::Error> {
        QuotaKeyRepo::deduct(&self.pool, key, cost).await
    }

    async fn enabled_plugin_bindings(
        &self,
        environment_id: DbId,
    ) -> Result<Vec<PluginBinding>, sqlx::Error> {
        PluginRepo::list_enabled_bindings(&self.pool, environment_id).await
    }

    async fn record_plugin_execution(
        &self,
        log: &CreatePluginExecutionLog,
    ) -> Result<(), sqlx::Error> {
        PluginExecutionLogRepo::create(&self.pool, log).await?;
        Ok(())
    }
}
