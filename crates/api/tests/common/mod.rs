//! In-memory collaborators and request helpers shared by the integration
//! tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use panelgate_core::quota::QuotaLockManager;
use panelgate_core::scripting::PluginSandbox;
use panelgate_core::types::DbId;
use panelgate_db::models::environment::{Environment, MODE_CREATE};
use panelgate_db::models::panel::Panel;
use panelgate_db::models::plugin::{CreatePluginExecutionLog, PluginBinding};
use panelgate_db::models::quota_key::QuotaKey;
use panelgate_panel::{
    EnvUpdate, NewEnv, PanelApi, PanelConnector, PanelEnv, PanelError, PanelTarget, RetryPolicy,
};
use serde_json::Value;
use tower::ServiceExt;

use panelgate_api::config::ServerConfig;
use panelgate_api::router::build_app_router;
use panelgate_api::state::AppState;
use panelgate_api::submission::{SubmissionService, SubmissionStore};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub environments: Mutex<HashMap<DbId, Environment>>,
    /// `(environment_id, panel)` in binding order.
    pub panels: Mutex<Vec<(DbId, Panel)>>,
    pub quota_keys: Mutex<HashMap<String, QuotaKey>>,
    pub plugins: Mutex<Vec<PluginBinding>>,
    pub usage: Mutex<HashMap<DbId, i64>>,
    pub execution_logs: Mutex<Vec<CreatePluginExecutionLog>>,
    pub saved_tokens: Mutex<HashMap<DbId, (String, Option<i64>)>>,
    pub unhealthy: AtomicBool,
    pub fail_queries: AtomicBool,
    pub fail_log_writes: AtomicBool,
    pub panic_on_panels: AtomicBool,
    /// Token writes find no row, as if the panel was deleted meanwhile.
    pub panels_vanish_on_save: AtomicBool,
}

impl MemoryStore {
    pub fn add_environment(&self, env: Environment) {
        self.environments.lock().unwrap().insert(env.id, env);
    }

    pub fn bind_panel(&self, environment_id: DbId, panel: Panel) {
        self.panels.lock().unwrap().push((environment_id, panel));
    }

    pub fn add_quota_key(&self, key: QuotaKey) {
        self.quota_keys.lock().unwrap().insert(key.key.clone(), key);
    }

    pub fn add_plugin(&self, binding: PluginBinding) {
        self.plugins.lock().unwrap().push(binding);
    }

    pub fn remaining(&self, key: &str) -> i32 {
        self.quota_keys.lock().unwrap()[key].remaining_uses
    }

    pub fn usage_of(&self, panel_id: DbId) -> i64 {
        self.usage.lock().unwrap().get(&panel_id).copied().unwrap_or(0)
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn health_check(&self) -> Result<(), sqlx::Error> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        Ok(())
    }

    async fn find_enabled_environment(&self, id: DbId) -> Result<Option<Environment>, sqlx::Error> {
        self.check()?;
        Ok(self
            .environments
            .lock()
            .unwrap()
            .get(&id)
            .filter(|env| env.is_enabled)
            .cloned())
    }

    async fn enabled_environments(&self) -> Result<Vec<Environment>, sqlx::Error> {
        self.check()?;
        let mut envs: Vec<Environment> = self
            .environments
            .lock()
            .unwrap()
            .values()
            .filter(|env| env.is_enabled)
            .cloned()
            .collect();
        envs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(envs)
    }

    async fn enabled_panels(&self, environment_id: DbId) -> Result<Vec<Panel>, sqlx::Error> {
        if self.panic_on_panels.load(Ordering::SeqCst) {
            panic!("panel listing exploded");
        }
        self.check()?;
        Ok(self
            .panels
            .lock()
            .unwrap()
            .iter()
            .filter(|(env_id, panel)| *env_id == environment_id && panel.is_enabled)
            .map(|(_, panel)| panel.clone())
            .collect())
    }

    async fn find_panel(&self, id: DbId) -> Result<Option<Panel>, sqlx::Error> {
        self.check()?;
        Ok(self
            .panels
            .lock()
            .unwrap()
            .iter()
            .find(|(_, panel)| panel.id == id)
            .map(|(_, panel)| panel.clone()))
    }

    async fn save_panel_token(
        &self,
        panel_id: DbId,
        token: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        if self.panels_vanish_on_save.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.saved_tokens
            .lock()
            .unwrap()
            .insert(panel_id, (token.to_string(), expires_at));
        Ok(true)
    }

    async fn increment_panel_usage(&self, panel_id: DbId) -> Result<(), sqlx::Error> {
        self.check()?;
        *self.usage.lock().unwrap().entry(panel_id).or_default() += 1;
        Ok(())
    }

    async fn find_quota_key(&self, key: &str) -> Result<Option<QuotaKey>, sqlx::Error> {
        self.check()?;
        let found = self.quota_keys.lock().unwrap().get(key).cloned();
        // Widen the window between check and deduct.
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn deduct_quota(&self, key: &str, cost: i32) -> Result<Option<i32>, sqlx::Error> {
        self.check()?;
        let mut keys = self.quota_keys.lock().unwrap();
        Ok(keys
            .get_mut(key)
            .filter(|k| k.is_enabled && k.remaining_uses >= cost)
            .map(|k| {
                k.remaining_uses -= cost;
                k.remaining_uses
            }))
    }

    async fn enabled_plugin_bindings(
        &self,
        environment_id: DbId,
    ) -> Result<Vec<PluginBinding>, sqlx::Error> {
        self.check()?;
        let mut bindings: Vec<PluginBinding> = self
            .plugins
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.environment_id == environment_id)
            .cloned()
            .collect();
        bindings.sort_by_key(|b| (b.execution_order, b.binding_id));
        Ok(bindings)
    }

    async fn record_plugin_execution(
        &self,
        log: &CreatePluginExecutionLog,
    ) -> Result<(), sqlx::Error> {
        self.check()?;
        if self.fail_log_writes.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.execution_logs.lock().unwrap().push(log.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Panels
// ---------------------------------------------------------------------------

pub struct FakePanel {
    id: DbId,
    pub envs: Mutex<Vec<PanelEnv>>,
    next_id: AtomicI64,
    pub fail_list: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_enable: AtomicBool,
    pub list_calls: AtomicUsize,
    pub enabled: Mutex<Vec<i64>>,
    pub updates: Mutex<Vec<EnvUpdate>>,
}

impl FakePanel {
    pub fn new(id: DbId) -> Self {
        Self {
            id,
            envs: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(id * 1000),
            fail_list: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            enabled: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// Seed an existing variable; returns its id.
    pub fn seed(&self, name: &str, value: &str, remarks: Option<&str>) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.envs.lock().unwrap().push(PanelEnv {
            id,
            name: name.to_string(),
            value: value.to_string(),
            remarks: remarks.map(str::to_string),
            status: 0,
            position: None,
            timestamp: None,
            created_at: None,
            updated_at: None,
        });
        id
    }

    pub fn values_of(&self, name: &str) -> Vec<String> {
        self.envs
            .lock()
            .unwrap()
            .iter()
            .filter(|env| env.name == name)
            .map(|env| env.value.clone())
            .collect()
    }

    pub fn env(&self, id: i64) -> Option<PanelEnv> {
        self.envs.lock().unwrap().iter().find(|env| env.id == id).cloned()
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    fn panel_id(&self) -> DbId {
        self.id
    }

    async fn list_envs(&self) -> Result<Vec<PanelEnv>, PanelError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(PanelError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.envs.lock().unwrap().clone())
    }

    async fn create_envs(&self, envs: &[NewEnv]) -> Result<Vec<PanelEnv>, PanelError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PanelError::Api {
                code: 400,
                message: "refused".to_string(),
            });
        }
        let created: Vec<PanelEnv> = envs
            .iter()
            .map(|env| PanelEnv {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name: env.name.clone(),
                value: env.value.clone(),
                remarks: env.remarks.clone(),
                status: 1,
                position: None,
                timestamp: None,
                created_at: None,
                updated_at: None,
            })
            .collect();
        self.envs.lock().unwrap().extend(created.iter().cloned());
        Ok(created)
    }

    async fn update_env(&self, update: &EnvUpdate) -> Result<PanelEnv, PanelError> {
        self.updates.lock().unwrap().push(update.clone());
        let mut envs = self.envs.lock().unwrap();
        let env = envs
            .iter_mut()
            .find(|env| env.id == update.id)
            .ok_or_else(|| PanelError::Api {
                code: 404,
                message: "no such variable".to_string(),
            })?;
        env.value = update.value.clone();
        env.remarks = Some(update.remarks.clone());
        Ok(env.clone())
    }

    async fn enable_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(PanelError::Api {
                code: 500,
                message: "enable failed".to_string(),
            });
        }
        self.enabled.lock().unwrap().extend_from_slice(ids);
        for env in self.envs.lock().unwrap().iter_mut() {
            if ids.contains(&env.id) {
                env.status = 0;
            }
        }
        Ok(())
    }

    async fn disable_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        for env in self.envs.lock().unwrap().iter_mut() {
            if ids.contains(&env.id) {
                env.status = 1;
            }
        }
        Ok(())
    }

    async fn delete_envs(&self, ids: &[i64]) -> Result<(), PanelError> {
        self.envs.lock().unwrap().retain(|env| !ids.contains(&env.id));
        Ok(())
    }
}

/// Hands out one [`FakePanel`] per panel id, creating empty ones on demand.
#[derive(Default)]
pub struct FakeConnector {
    panels: Mutex<HashMap<DbId, Arc<FakePanel>>>,
}

impl FakeConnector {
    pub fn panel(&self, id: DbId) -> Arc<FakePanel> {
        Arc::clone(
            self.panels
                .lock()
                .unwrap()
                .entry(id)
                .or_insert_with(|| Arc::new(FakePanel::new(id))),
        )
    }
}

#[async_trait]
impl PanelConnector for FakeConnector {
    async fn connect(&self, target: &PanelTarget) -> Arc<dyn PanelApi> {
        let panel: Arc<dyn PanelApi> = self.panel(target.id);
        panel
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn environment(id: DbId, name: &str, quantity: i32) -> Environment {
    let now = chrono::Utc::now();
    Environment {
        id,
        name: name.to_string(),
        remarks: None,
        quantity,
        regex: None,
        regex_policy: "match".to_string(),
        mode: MODE_CREATE,
        regex_update: None,
        is_auto_enable: false,
        is_quota_required: false,
        quota_cost: 1,
        is_enabled: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn panel(id: DbId) -> Panel {
    let now = chrono::Utc::now();
    Panel {
        id,
        name: format!("panel-{id}"),
        url: format!("http://panel-{id}.invalid"),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        token: Some("token".to_string()),
        token_expires_at: None,
        is_enabled: true,
        usage_count: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn quota_key(key: &str, remaining_uses: i32, is_enabled: bool) -> QuotaKey {
    let now = chrono::Utc::now();
    QuotaKey {
        id: 1,
        key: key.to_string(),
        remaining_uses,
        is_enabled,
        created_at: now,
        updated_at: now,
    }
}

pub fn plugin(plugin_id: DbId, environment_id: DbId, order: i32, script: &str) -> PluginBinding {
    PluginBinding {
        binding_id: plugin_id,
        plugin_id,
        plugin_name: format!("plugin-{plugin_id}"),
        script_content: script.to_string(),
        execution_timeout_ms: 2000,
        environment_id,
        execution_order: order,
        config: None,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub connector: Arc<FakeConnector>,
    pub locks: Arc<QuotaLockManager>,
    pub service: Arc<SubmissionService>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    let connector = Arc::new(FakeConnector::default());
    let locks = Arc::new(QuotaLockManager::new());
    let service = Arc::new(SubmissionService::new(
        Arc::clone(&store) as Arc<dyn SubmissionStore>,
        Arc::clone(&connector) as Arc<dyn PanelConnector>,
        PluginSandbox::new(Duration::from_secs(2)),
        Arc::clone(&locks),
        RetryPolicy {
            attempts: 2,
            backoff: Duration::ZERO,
        },
    ));
    Harness {
        store,
        connector,
        locks,
        service,
    }
}

/// Poll `condition` for up to a second; detached tasks finish asynchronously.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        plugin_test_enabled: true,
    }
}

/// Build the full application router around `harness`'s service.
pub fn build_test_app(harness: &Harness) -> Router {
    build_test_app_with(harness, &test_config())
}

pub fn build_test_app_with(harness: &Harness, config: &ServerConfig) -> Router {
    let state = AppState {
        submissions: Arc::clone(&harness.service),
    };
    build_app_router(state, config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
