/**
 * Project Routes
 * CRUD API endpoints for portfolio projects. Projects carry an ordered list
 * of skill ids; responses embed the resolved {_id, name} pairs.
 */
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::db::{self, models::Project};
use crate::error::ApiError;
use crate::routes::{
    clamp_paging, default_page, default_page_size, parse_entity_id, require_auth, upload, Paged,
};

const PROJECT_COLUMNS: &str = "id, title, description, technologies, image_url, image_storage_id, \
                               demo_url, repo_url, owner_id, created_at, updated_at";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for GET /api/projects (list)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

/// A resolved technology reference embedded in project responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct TechnologyRef {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub technologies: Vec<TechnologyRef>,
    pub image_url: String,
    pub demo_url: Option<String>,
    pub repo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request body for POST /api/projects (create)
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<Uuid>,
    pub image_url: String,
    pub image_storage_id: String,
    pub demo_url: Option<String>,
    pub repo_url: Option<String>,
}

/// Request body for PATCH /api/projects/:id (update)
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub technologies: Option<Vec<Uuid>>,
    pub image_url: Option<String>,
    pub image_storage_id: Option<String>,
    pub demo_url: Option<String>,
    pub repo_url: Option<String>,
}

// ============================================================================
// Technology resolution and validation
// ============================================================================

/// Every supplied id must reference an existing skill. Duplicates within the
/// list are allowed; each distinct id is checked once.
async fn validate_technologies(pool: &PgPool, ids: &[Uuid]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Ok(());
    }
    let distinct: Vec<Uuid> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE id = ANY($1)")
        .bind(&distinct)
        .fetch_one(pool)
        .await?;

    if found as usize != distinct.len() {
        return Err(ApiError::validation(
            "One or more technology ids do not reference an existing skill",
        ));
    }
    Ok(())
}

/// Batch-resolve skill names for a page of projects.
async fn technology_names(
    pool: &PgPool,
    projects: &[Project],
) -> Result<HashMap<Uuid, String>, sqlx::Error> {
    let ids: Vec<Uuid> = projects
        .iter()
        .flat_map(|p| p.technologies.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, String)> = sqlx::query_as("SELECT id, name FROM skills WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().collect())
}

/// Order and duplicates in `technologies` are preserved; ids with no matching
/// skill (possible only if cascade cleanup was bypassed) are dropped from the
/// response rather than surfaced as holes.
fn to_response(project: Project, names: &HashMap<Uuid, String>) -> ProjectResponse {
    let technologies = project
        .technologies
        .iter()
        .filter_map(|id| {
            names.get(id).map(|name| TechnologyRef {
                id: *id,
                name: name.clone(),
            })
        })
        .collect();

    ProjectResponse {
        id: project.id,
        title: project.title,
        description: project.description,
        technologies,
        image_url: project.image_url,
        demo_url: project.demo_url,
        repo_url: project.repo_url,
        created_at: project.created_at,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/projects - newest-first page of projects
pub async fn list_projects(
    Query(query): Query<ProjectListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = db::require_pool()?;
    let (page, page_size) = clamp_paging(query.page, query.page_size);
    let offset = (page - 1) * page_size;

    let projects = sqlx::query_as::<_, Project>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool.as_ref())
    .await?;

    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(pool.as_ref())
        .await?;

    let names = technology_names(pool.as_ref(), &projects).await?;
    let items: Vec<ProjectResponse> = projects
        .into_iter()
        .map(|p| to_response(p, &names))
        .collect();

    Ok(Json(Paged::new(items, page, page_size, total_items)))
}

/// GET /api/projects/:id - single project
pub async fn get_project(Path(raw_id): Path<String>) -> Result<Json<ProjectResponse>, ApiError> {
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    let project = sqlx::query_as::<_, Project>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    let names = technology_names(pool.as_ref(), std::slice::from_ref(&project)).await?;
    Ok(Json(to_response(project, &names)))
}

/// POST /api/projects - create a project (auth required)
pub async fn create_project(
    headers: HeaderMap,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;

    if payload.title.trim().is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    if payload.description.trim().is_empty() {
        return Err(ApiError::validation("Description is required"));
    }
    if payload.image_url.trim().is_empty() || payload.image_storage_id.trim().is_empty() {
        return Err(ApiError::validation("Image is required"));
    }

    let pool = db::require_pool()?;

    match persist_new_project(pool.as_ref(), owner_id, &payload).await {
        Ok(project) => {
            tracing::info!("Project created: {}", project.title);
            let names = technology_names(pool.as_ref(), std::slice::from_ref(&project)).await?;
            Ok((StatusCode::CREATED, Json(to_response(project, &names))))
        }
        Err(err) => {
            upload::discard_stored_image(&payload.image_storage_id).await;
            Err(err)
        }
    }
}

async fn persist_new_project(
    pool: &PgPool,
    owner_id: Uuid,
    payload: &CreateProjectRequest,
) -> Result<Project, ApiError> {
    validate_technologies(pool, &payload.technologies).await?;

    let project = sqlx::query_as::<_, Project>(&format!(
        r#"
        INSERT INTO projects
            (title, description, technologies, image_url, image_storage_id,
             demo_url, repo_url, owner_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {PROJECT_COLUMNS}
        "#
    ))
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(&payload.technologies)
    .bind(&payload.image_url)
    .bind(&payload.image_storage_id)
    .bind(&payload.demo_url)
    .bind(&payload.repo_url)
    .bind(owner_id)
    .fetch_one(pool)
    .await?;

    Ok(project)
}

/// PATCH /api/projects/:id - update a project (auth required, owner only)
pub async fn update_project(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    let existing = sqlx::query_as::<_, Project>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND owner_id = $2"
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
    let description = payload
        .description
        .unwrap_or_else(|| existing.description.clone());
    let technologies = match payload.technologies {
        Some(ids) => {
            validate_technologies(pool.as_ref(), &ids).await?;
            ids
        }
        None => existing.technologies.clone(),
    };
    let image_url = payload.image_url.unwrap_or_else(|| existing.image_url.clone());
    let image_storage_id = payload
        .image_storage_id
        .unwrap_or_else(|| existing.image_storage_id.clone());
    let demo_url = payload.demo_url.or_else(|| existing.demo_url.clone());
    let repo_url = payload.repo_url.or_else(|| existing.repo_url.clone());

    let updated = sqlx::query_as::<_, Project>(&format!(
        r#"
        UPDATE projects
        SET title = $1, description = $2, technologies = $3, image_url = $4,
            image_storage_id = $5, demo_url = $6, repo_url = $7, updated_at = now()
        WHERE id = $8 AND owner_id = $9
        RETURNING {PROJECT_COLUMNS}
        "#
    ))
    .bind(&title)
    .bind(&description)
    .bind(&technologies)
    .bind(&image_url)
    .bind(&image_storage_id)
    .bind(&demo_url)
    .bind(&repo_url)
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    if updated.image_storage_id != existing.image_storage_id {
        upload::discard_stored_image(&existing.image_storage_id).await;
    }

    tracing::info!("Project updated: {}", updated.title);
    let names = technology_names(pool.as_ref(), std::slice::from_ref(&updated)).await?;
    Ok(Json(to_response(updated, &names)))
}

/// DELETE /api/projects/:id - delete a project (auth required, owner only)
pub async fn delete_project(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    let deleted = sqlx::query_as::<_, Project>(&format!(
        "DELETE FROM projects WHERE id = $1 AND owner_id = $2 RETURNING {PROJECT_COLUMNS}"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound)?;

    upload::discard_stored_image(&deleted.image_storage_id).await;

    tracing::info!("Project deleted: {}", deleted.title);
    let names = technology_names(pool.as_ref(), std::slice::from_ref(&deleted)).await?;
    Ok(Json(to_response(deleted, &names)))
}
