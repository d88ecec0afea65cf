//! Repository for the `environments` and `environment_panels` tables.

use panelgate_core::types::DbId;
use sqlx::PgPool;

use crate::models::environment::Environment;
use crate::models::panel::Panel;
use crate::repositories::panel_repo::PANEL_COLUMNS;

/// Column list for `environments` queries.
const COLUMNS: &str = "\
    id, name, remarks, quantity, regex, regex_policy, mode, regex_update, \
    is_auto_enable, is_quota_required, quota_cost, is_enabled, created_at, updated_at";

pub struct EnvironmentRepo;

impl EnvironmentRepo {
    /// All enabled environments, newest first.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Environment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM environments WHERE is_enabled = true \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, Environment>(&query).fetch_all(pool).await
    }

    /// Find an environment that exists and is enabled.
    pub async fn find_enabled(pool: &PgPool, id: DbId) -> Result<Option<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM environments WHERE id = $1 AND is_enabled = true");
        sqlx::query_as::<_, Environment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Enabled panels bound to an environment, in id order.
    pub async fn list_enabled_panels(
        pool: &PgPool,
        environment_id: DbId,
    ) -> Result<Vec<Panel>, sqlx::Error> {
        let columns = PANEL_COLUMNS
            .split(',')
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {columns} FROM panels p \
             JOIN environment_panels ep ON ep.panel_id = p.id \
             WHERE ep.environment_id = $1 AND p.is_enabled = true \
             ORDER BY p.id ASC"
        );
        sqlx::query_as::<_, Panel>(&query)
            .bind(environment_id)
            .fetch_all(pool)
            .await
    }
}
