//! Key-value settings table access

use crate::Result;
use sqlx::SqlitePool;

/// Read a setting; `None` when absent or NULL
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value.flatten())
}

/// Insert or overwrite a setting
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Read a setting as an integer, falling back when absent or unparsable
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_set_then_get_overwrites() {
        let pool = test_pool().await;

        assert_eq!(get_setting(&pool, "last_sync_time").await.unwrap(), None);

        set_setting(&pool, "last_sync_time", "a").await.unwrap();
        set_setting(&pool, "last_sync_time", "b").await.unwrap();

        assert_eq!(
            get_setting(&pool, "last_sync_time").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_get_setting_i64_default() {
        let pool = test_pool().await;
        set_setting(&pool, "max_lock_wait_ms", "not-a-number").await.unwrap();

        assert_eq!(get_setting_i64(&pool, "max_lock_wait_ms", 5000).await.unwrap(), 5000);
        assert_eq!(get_setting_i64(&pool, "missing", 42).await.unwrap(), 42);
    }
}
