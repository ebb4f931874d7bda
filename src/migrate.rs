use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};

const MIN_SQLITE: (u32, u32) = (3, 38);

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the `document` table and its index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    let version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await?;
    if !is_supported(&version) {
        return Err(Error::UnsupportedSqlite(version));
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document (
            id TEXT PRIMARY KEY,
            doctype TEXT NOT NULL,
            key TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            UNIQUE(doctype, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_document_doctype ON document(doctype)")
        .execute(pool)
        .await?;

    tracing::debug!(sqlite = %version, "schema ready");
    Ok(())
}

fn is_supported(version: &str) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= MIN_SQLITE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_gate() {
        assert!(is_supported("3.38.0"));
        assert!(is_supported("3.45.1"));
        assert!(is_supported("4.0.0"));
        assert!(!is_supported("3.37.2"));
        assert!(!is_supported("garbage"));
    }
}
