//! Repository for the `panels` table.

use panelgate_core::types::DbId;
use sqlx::PgPool;

use crate::models::panel::Panel;

/// Column list for `panels` queries.
pub(crate) const PANEL_COLUMNS: &str = "\
    id, name, url, client_id, client_secret, token, token_expires_at, \
    is_enabled, usage_count, created_at, updated_at";

pub struct PanelRepo;

impl PanelRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Panel>, sqlx::Error> {
        let query = format!("SELECT {PANEL_COLUMNS} FROM panels WHERE id = $1");
        sqlx::query_as::<_, Panel>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Persist a freshly issued token. Returns `true` if a row was updated.
    pub async fn update_token(
        pool: &PgPool,
        id: DbId,
        token: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE panels SET token = $2, token_expires_at = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump the usage counter after a successful create.
    pub async fn increment_usage(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE panels SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
