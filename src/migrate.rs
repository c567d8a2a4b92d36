use sqlx::SqlitePool;

use crate::error::PipelineResult;

/// Create the answer cache schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> PipelineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answer_cache (
            key TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            jurisdiction TEXT NOT NULL,
            response TEXT NOT NULL,
            source_tier TEXT NOT NULL,
            contexts_used INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_answer_cache_created_at ON answer_cache(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
