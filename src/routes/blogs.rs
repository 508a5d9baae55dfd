/**
 * Blog Routes
 * CRUD API endpoints for blog posts. Posts are addressed by native id or by
 * their slug; slugs are derived from the title and kept unique.
 */
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{self, models::Blog};
use crate::error::ApiError;
use crate::routes::{
    clamp_paging, default_page, default_page_size, parse_entity_id, require_auth, upload, Paged,
};
use crate::slug::{ensure_unique_slug, slug_base};

const BLOG_COLUMNS: &str =
    "id, title, slug, content, thumbnail_url, thumbnail_storage_id, owner_id, created_at, updated_at";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for GET /api/blogs (list)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Case-insensitive substring match against title OR content.
    pub keyword: Option<String>,
}

/// List view: everything but the post body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Blog> for BlogSummary {
    fn from(blog: Blog) -> Self {
        Self {
            id: blog.id,
            title: blog.title,
            slug: blog.slug,
            thumbnail_url: blog.thumbnail_url,
            created_at: blog.created_at,
            updated_at: blog.updated_at,
        }
    }
}

/// Detail view: includes the post body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogDetail {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Blog> for BlogDetail {
    fn from(blog: Blog) -> Self {
        Self {
            id: blog.id,
            title: blog.title,
            slug: blog.slug,
            content: blog.content,
            thumbnail_url: blog.thumbnail_url,
            created_at: blog.created_at,
            updated_at: blog.updated_at,
        }
    }
}

/// Request body for POST /api/blogs (create). The slug is always derived
/// server-side from the title, never accepted from the client.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlogRequest {
    pub title: String,
    pub content: String,
    pub thumbnail_url: String,
    pub thumbnail_storage_id: String,
}

/// Request body for PATCH /api/blogs/:id (update). Only these fields are ever
/// copied onto the post; unknown keys in the payload are dropped by serde.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlogRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_storage_id: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

lazy_static::lazy_static! {
    /// Valid slug pattern: lowercase letters, numbers, and hyphens
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

fn is_valid_slug(slug: &str) -> bool {
    SLUG_REGEX.is_match(slug)
}

/// Pick which unique value to report when the store rejects a blog write.
/// Both title and slug carry unique indexes; the slug one can lose a race
/// the advisory pre-check did not see.
fn blog_conflict_value<'a>(constraint: Option<&str>, title: &'a str, slug: &'a str) -> &'a str {
    match constraint {
        Some(name) if name.contains("slug") => slug,
        _ => title,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/blogs - newest-first page of posts, optionally filtered by keyword
pub async fn list_blogs(Query(query): Query<BlogListQuery>) -> Result<impl IntoResponse, ApiError> {
    let pool = db::require_pool()?;
    let (page, page_size) = clamp_paging(query.page, query.page_size);
    let offset = (page - 1) * page_size;
    let keyword = query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let posts = sqlx::query_as::<_, Blog>(&format!(
        r#"
        SELECT {BLOG_COLUMNS}
        FROM blogs
        WHERE $1::text IS NULL
           OR title ILIKE '%' || $1 || '%'
           OR content ILIKE '%' || $1 || '%'
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(keyword)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool.as_ref())
    .await?;

    let total_items: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM blogs
        WHERE $1::text IS NULL
           OR title ILIKE '%' || $1 || '%'
           OR content ILIKE '%' || $1 || '%'
        "#,
    )
    .bind(keyword)
    .fetch_one(pool.as_ref())
    .await?;

    let items: Vec<BlogSummary> = posts.into_iter().map(BlogSummary::from).collect();
    Ok(Json(Paged::new(items, page, page_size, total_items)))
}

/// GET /api/blogs/:key - single post, addressed by id or slug.
/// The key is tried as a native id first; on parse failure or id miss it is
/// retried as a slug, so the identifier match always takes precedence.
pub async fn get_blog(Path(key): Path<String>) -> Result<Json<BlogDetail>, ApiError> {
    let pool = db::require_pool()?;

    if let Ok(id) = Uuid::parse_str(&key) {
        let found = sqlx::query_as::<_, Blog>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await?;
        if let Some(blog) = found {
            return Ok(Json(blog.into()));
        }
    }

    if is_valid_slug(&key) {
        let found = sqlx::query_as::<_, Blog>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE slug = $1"
        ))
        .bind(&key)
        .fetch_optional(pool.as_ref())
        .await?;
        if let Some(blog) = found {
            return Ok(Json(blog.into()));
        }
    }

    Err(ApiError::NotFound)
}

/// POST /api/blogs - create a post (auth required)
pub async fn create_blog(
    headers: HeaderMap,
    Json(payload): Json<CreateBlogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    if payload.content.trim().is_empty() {
        return Err(ApiError::validation("Content is required"));
    }
    if payload.thumbnail_url.trim().is_empty() || payload.thumbnail_storage_id.trim().is_empty() {
        return Err(ApiError::validation("Thumbnail is required"));
    }

    let pool = db::require_pool()?;

    match persist_new_blog(pool.as_ref(), owner_id, title, &payload).await {
        Ok(blog) => {
            tracing::info!("Blog post created: {} ({})", blog.title, blog.slug);
            Ok((StatusCode::CREATED, Json(BlogDetail::from(blog))))
        }
        Err(err) => {
            // The thumbnail was uploaded before this request; without the post
            // it would be orphaned.
            upload::discard_stored_image(&payload.thumbnail_storage_id).await;
            Err(err)
        }
    }
}

async fn persist_new_blog(
    pool: &PgPool,
    owner_id: Uuid,
    title: &str,
    payload: &CreateBlogRequest,
) -> Result<Blog, ApiError> {
    // Advisory duplicate probe; the unique index settles concurrent creates.
    let duplicate: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blogs WHERE title = $1)")
        .bind(title)
        .fetch_one(pool)
        .await?;
    if duplicate {
        return Err(ApiError::AlreadyExists(title.to_string()));
    }

    let slug = ensure_unique_slug(pool, &slug_base(title), None).await?;

    sqlx::query_as::<_, Blog>(&format!(
        r#"
        INSERT INTO blogs (title, slug, content, thumbnail_url, thumbnail_storage_id, owner_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {BLOG_COLUMNS}
        "#
    ))
    .bind(title)
    .bind(&slug)
    .bind(&payload.content)
    .bind(&payload.thumbnail_url)
    .bind(&payload.thumbnail_storage_id)
    .bind(owner_id)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        let value = blog_conflict_value(crate::error::unique_constraint(&e), title, &slug).to_string();
        ApiError::on_unique_conflict(e, &value)
    })
}

/// PATCH /api/blogs/:id - update a post (auth required, owner only).
/// The slug is recomputed only when the title actually changes.
pub async fn update_blog(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(payload): Json<UpdateBlogRequest>,
) -> Result<Json<BlogDetail>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    // Combined existence-and-ownership match: an id owned by someone else
    // looks exactly like an id that does not exist.
    let existing = sqlx::query_as::<_, Blog>(&format!(
        "SELECT {BLOG_COLUMNS} FROM blogs WHERE id = $1 AND owner_id = $2"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    let title = match payload.title {
        Some(t) => {
            let t = t.trim().to_string();
            if t.is_empty() {
                return Err(ApiError::validation("Title cannot be empty"));
            }
            t
        }
        None => existing.title.clone(),
    };
    let content = payload.content.unwrap_or_else(|| existing.content.clone());
    let thumbnail_url = payload
        .thumbnail_url
        .unwrap_or_else(|| existing.thumbnail_url.clone());
    let thumbnail_storage_id = payload
        .thumbnail_storage_id
        .unwrap_or_else(|| existing.thumbnail_storage_id.clone());

    let slug = if title != existing.title {
        let duplicate: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blogs WHERE title = $1 AND id <> $2)")
                .bind(&title)
                .bind(id)
                .fetch_one(pool.as_ref())
                .await?;
        if duplicate {
            return Err(ApiError::AlreadyExists(title));
        }
        ensure_unique_slug(pool.as_ref(), &slug_base(&title), Some(id)).await?
    } else {
        existing.slug.clone()
    };

    let updated = sqlx::query_as::<_, Blog>(&format!(
        r#"
        UPDATE blogs
        SET title = $1, slug = $2, content = $3,
            thumbnail_url = $4, thumbnail_storage_id = $5, updated_at = now()
        WHERE id = $6 AND owner_id = $7
        RETURNING {BLOG_COLUMNS}
        "#
    ))
    .bind(&title)
    .bind(&slug)
    .bind(&content)
    .bind(&thumbnail_url)
    .bind(&thumbnail_storage_id)
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await
    .map_err(|e| {
        let value =
            blog_conflict_value(crate::error::unique_constraint(&e), &title, &slug).to_string();
        ApiError::on_unique_conflict(e, &value)
    })?
    .ok_or(ApiError::NotFound)?;

    // A replaced thumbnail leaves the old asset orphaned.
    if updated.thumbnail_storage_id != existing.thumbnail_storage_id {
        upload::discard_stored_image(&existing.thumbnail_storage_id).await;
    }

    tracing::info!("Blog post updated: {} ({})", updated.title, updated.slug);
    Ok(Json(updated.into()))
}

/// DELETE /api/blogs/:id - delete a post (auth required, owner only)
pub async fn delete_blog(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Json<BlogDetail>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    let deleted = sqlx::query_as::<_, Blog>(&format!(
        "DELETE FROM blogs WHERE id = $1 AND owner_id = $2 RETURNING {BLOG_COLUMNS}"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    upload::discard_stored_image(&deleted.thumbnail_storage_id).await;

    tracing::info!("Blog post deleted: {} ({})", deleted.title, deleted.slug);
    Ok(Json(deleted.into()))
}
