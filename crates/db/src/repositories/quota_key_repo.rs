//! Repository for the `quota_keys` table.

use sqlx::PgPool;

use crate::models::quota_key::QuotaKey;

/// Column list for `quota_keys` queries.
const COLUMNS: &str = "id, key, remaining_uses, is_enabled, created_at, updated_at";

pub struct QuotaKeyRepo;

impl QuotaKeyRepo {
    pub async fn find_by_key(pool: &PgPool, key: &str) -> Result<Option<QuotaKey>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM quota_keys WHERE key = $1");
        sqlx::query_as::<_, QuotaKey>(&query)
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Atomically take `cost` uses from an enabled key.
    ///
    /// Returns the new balance, or `None` when the key is missing, disabled
    /// or short of `cost` (no row is touched in that case).
    pub async fn deduct(pool: &PgPool, key: &str, cost: i32) -> Result<Option<i32>, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE quota_keys \
             SET remaining_uses = remaining_uses - $2, updated_at = NOW() \
             WHERE key = $1 AND is_enabled = true AND remaining_uses >= $2 \
             RETURNING remaining_uses",
        )
        .bind(key)
        .bind(cost)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(remaining,)| remaining))
    }
}
