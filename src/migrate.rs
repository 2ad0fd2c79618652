use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Listings table: current (possibly harmonized) fields plus the original
    // scraped fields for provenance and re-apply.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            fields_json TEXT NOT NULL,
            raw_json TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(source, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mapping_sets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            mappings_json TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_updated_at ON listings(updated_at DESC)")
        .execute(pool)
        .await?;

    // The single-active invariant, enforced by the store itself: the partial
    // index covers only rows with is_active = 1, so a second active row is a
    // constraint violation no matter which code path tries to write it.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mapping_sets_one_active
        ON mapping_sets(is_active) WHERE is_active = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
