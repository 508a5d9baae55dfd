pub mod models;

use crate::error::ApiError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tokio::sync::OnceCell;

static DB_POOL: OnceCell<Arc<PgPool>> = OnceCell::const_new();

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/portfolio".to_string()),
            max_connections: std::env::var("DB_POOL_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_POOL_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

pub async fn init_pool(config: Option<DbConfig>) -> Result<Arc<PgPool>, sqlx::Error> {
    let config = config.unwrap_or_default();

    tracing::info!("Initializing database connection pool...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    tracing::info!("Database connection pool initialized successfully");

    let pool = Arc::new(pool);
    let _ = DB_POOL.set(pool.clone());

    Ok(pool)
}

pub fn get_pool() -> Option<Arc<PgPool>> {
    DB_POOL.get().cloned()
}

/// Pool accessor for request handlers: a missing pool is an infrastructure
/// failure, not a client error.
pub fn require_pool() -> Result<Arc<PgPool>, ApiError> {
    get_pool().ok_or_else(|| ApiError::Internal("database pool not initialized".to_string()))
}

pub async fn health_check() -> Result<std::time::Duration, sqlx::Error> {
    let pool = get_pool()
        .ok_or_else(|| sqlx::Error::Configuration("Database pool not initialized".into()))?;

    let start = std::time::Instant::now();
    sqlx::query("SELECT 1").fetch_one(pool.as_ref()).await?;

    Ok(start.elapsed())
}

/// Startup DDL, one command per entry. Each entry is run as its own prepared
/// statement; Postgres rejects prepared statements carrying more than one
/// command, so the statements must never be batched.
const MIGRATION_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT 'admin',
        reset_token_hash TEXT,
        reset_token_expires_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_lower
        ON users (LOWER(email))
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_users_reset_token_hash
        ON users (reset_token_hash)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skills (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name TEXT UNIQUE NOT NULL,
        owner_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        technologies UUID[] NOT NULL DEFAULT '{}',
        image_url TEXT NOT NULL,
        image_storage_id TEXT NOT NULL,
        demo_url TEXT,
        repo_url TEXT,
        owner_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_projects_created_at
        ON projects (created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_projects_owner_id
        ON projects (owner_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blogs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        title TEXT UNIQUE NOT NULL,
        slug TEXT UNIQUE NOT NULL,
        content TEXT NOT NULL,
        thumbnail_url TEXT NOT NULL,
        thumbnail_storage_id TEXT NOT NULL,
        owner_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_blogs_created_at
        ON blogs (created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_blogs_owner_id
        ON blogs (owner_id)
    "#,
];

/// Create the content tables and their unique indexes. Idempotent; runs on
/// every startup. The unique indexes on blog title/slug, skill name and the
/// lowercased user email are the authoritative enforcement of those
/// invariants — application-level pre-checks are advisory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    for statement in MIGRATION_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database migrations completed successfully");

    Ok(())
}

/// Store-backed tests opt in by setting TEST_DATABASE_URL; without it they
/// return early. Uses a local pool so the process-wide singleton stays
/// untouched for the tests that depend on it being absent.
#[cfg(test)]
pub(crate) async fn connect_test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");
    run_migrations(&pool)
        .await
        .expect("failed to run migrations against TEST_DATABASE_URL");
    Some(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_default_uses_env_or_fallback() {
        let config = DbConfig::default();
        assert!(config.max_connections >= 1);
        assert!(config.connect_timeout_secs >= 1);
        assert!(config.idle_timeout_secs >= 1);
        assert!(!config.url.is_empty());
    }

    #[test]
    fn test_require_pool_errors_before_init() {
        // No test ever initializes the pool, so the accessor must refuse.
        assert!(require_pool().is_err());
    }

    #[tokio::test]
    async fn test_health_check_fails_without_pool() {
        let result = health_check().await;
        assert!(result.is_err());
    }

    #[test]
    fn test_migration_statements_are_single_commands() {
        // Postgres refuses prepared statements with more than one command.
        for statement in MIGRATION_STATEMENTS {
            assert!(
                !statement.contains(';'),
                "statement carries multiple commands: {}",
                statement
            );
        }
    }

    #[tokio::test]
    async fn test_migrations_apply_and_are_idempotent() {
        let Some(pool) = connect_test_pool().await else {
            return;
        };

        // connect_test_pool already ran the migrations once; a second run
        // must be a no-op, not an error.
        run_migrations(&pool).await.unwrap();

        for table in ["users", "skills", "projects", "blogs"] {
            let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(table)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert!(exists.is_some(), "missing table {}", table);
        }

        for index in ["idx_users_email_lower", "idx_blogs_created_at"] {
            let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(index)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert!(exists.is_some(), "missing index {}", index);
        }
    }
}
