//! Idempotent schema setup.
//!
//! Every statement is safe to re-run, so `nutriflow init` can be executed
//! on every deploy. The similarity search lives in the database as
//! `match_closest_canonical_menu` so the ivfflat index is used on the
//! server side rather than streaming vectors to the client.

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;

const STATEMENTS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    "CREATE TABLE IF NOT EXISTS user_profile (
        id UUID PRIMARY KEY,
        stripe_customer_id TEXT,
        stripe_subscription_id TEXT,
        subscription_status TEXT,
        plan TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS canonical_menus (
        id UUID PRIMARY KEY,
        normalized_restaurant_name TEXT,
        normalized_location TEXT,
        content_signature_hash TEXT,
        full_structure_hash TEXT NOT NULL,
        dish_count BIGINT NOT NULL DEFAULT 0,
        embedding vector(1536),
        first_scan_id UUID,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS menu_scan (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES user_profile(id),
        canonical_menu_id UUID REFERENCES canonical_menus(id),
        image_hash TEXT NOT NULL,
        menu_raw_text TEXT NOT NULL,
        restaurant_name TEXT,
        location TEXT,
        ocr_method TEXT NOT NULL,
        scanned_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS menu_dishes (
        id UUID PRIMARY KEY,
        canonical_menu_id UUID NOT NULL REFERENCES canonical_menus(id),
        name TEXT NOT NULL,
        description TEXT,
        price DOUBLE PRECISION,
        category TEXT,
        tags TEXT[] NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS user_goals_and_diets (
        user_id UUID PRIMARY KEY REFERENCES user_profile(id),
        goals TEXT[] NOT NULL DEFAULT '{}',
        diets TEXT[] NOT NULL DEFAULT '{}',
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_preferences (
        user_id UUID PRIMARY KEY REFERENCES user_profile(id),
        preferences JSONB NOT NULL DEFAULT '{}',
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_menu_scan_user_image \
     ON menu_scan (user_id, image_hash)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_canonical_signature \
     ON canonical_menus (content_signature_hash) \
     WHERE content_signature_hash IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_canonical_full_hash \
     ON canonical_menus (full_structure_hash)",
    "CREATE INDEX IF NOT EXISTS idx_user_profile_customer \
     ON user_profile (stripe_customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_canonical_embedding \
     ON canonical_menus USING ivfflat (embedding vector_cosine_ops) \
     WITH (lists = 100)",
    "CREATE OR REPLACE FUNCTION match_closest_canonical_menu(
        query_embedding vector(1536),
        match_count INT DEFAULT 1
    ) RETURNS TABLE (id UUID, similarity DOUBLE PRECISION)
    LANGUAGE sql STABLE AS $$
        SELECT cm.id, 1 - (cm.embedding <=> query_embedding) AS similarity
        FROM canonical_menus cm
        WHERE cm.embedding IS NOT NULL
        ORDER BY cm.embedding <=> query_embedding
        LIMIT match_count
    $$",
];

/// Apply the schema. Safe to run repeatedly.
pub async fn run(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| {
                let head: String = statement.chars().take(60).collect();
                format!("Migration statement failed: {}", head)
            })?;
    }
    tracing::info!(statements = STATEMENTS.len(), "Schema is up to date");
    Ok(())
}
