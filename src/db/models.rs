//! Database Models - row structs mapped from the store by sqlx.
//!
//! Wire-facing response shapes live with their route modules; these structs
//! mirror the tables exactly (password hashes and storage ids included) and
//! are never serialized directly.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Admin account. Created by the seeding binary, never via a public endpoint.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `technologies` holds skill ids in insertion order. Duplicates are allowed
/// by the model; referenced ids are existence-checked at write time and
/// scrubbed by the cascade when a skill is deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub technologies: Vec<Uuid>,
    pub image_url: String,
    pub image_storage_id: String,
    pub demo_url: Option<String>,
    pub repo_url: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Blog {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub thumbnail_url: String,
    pub thumbnail_storage_id: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
