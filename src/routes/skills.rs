/**
 * Skill Routes
 * CRUD API endpoints for skills/technologies. Deleting a skill scrubs its id
 * from every project's technology list before the row itself goes away.
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{self, models::Skill};
use crate::error::ApiError;
use crate::routes::{parse_entity_id, require_auth};

const SKILL_COLUMNS: &str = "id, name, owner_id, created_at, updated_at";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Skill> for SkillResponse {
    fn from(skill: Skill) -> Self {
        Self {
            id: skill.id,
            name: skill.name,
            created_at: skill.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSkillRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateSkillRequest {
    pub name: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/skills - all skills, alphabetical (auth required)
pub async fn list_skills(headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers)?;
    let pool = db::require_pool()?;

    let skills = sqlx::query_as::<_, Skill>(&format!(
        "SELECT {SKILL_COLUMNS} FROM skills ORDER BY name ASC"
    ))
    .fetch_all(pool.as_ref())
    .await?;

    let items: Vec<SkillResponse> = skills.into_iter().map(SkillResponse::from).collect();
    Ok(Json(items))
}

/// POST /api/skills - create a skill (auth required)
pub async fn create_skill(
    headers: HeaderMap,
    Json(payload): Json<CreateSkillRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }

    let pool = db::require_pool()?;

    // Advisory duplicate probe; the unique index settles concurrent creates.
    let duplicate: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM skills WHERE name = $1)")
        .bind(name)
        .fetch_one(pool.as_ref())
        .await?;
    if duplicate {
        return Err(ApiError::AlreadyExists(name.to_string()));
    }

    let skill = sqlx::query_as::<_, Skill>(&format!(
        "INSERT INTO skills (name, owner_id) VALUES ($1, $2) RETURNING {SKILL_COLUMNS}"
    ))
    .bind(name)
    .bind(owner_id)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| ApiError::on_unique_conflict(e, name))?;

    tracing::info!("Skill created: {}", skill.name);
    Ok((StatusCode::CREATED, Json(SkillResponse::from(skill))))
}

/// PATCH /api/skills/:id - rename a skill (auth required, owner only)
pub async fn update_skill(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(payload): Json<UpdateSkillRequest>,
) -> Result<Json<SkillResponse>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;

    let name = match payload.name {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(ApiError::validation("Name cannot be empty"));
            }
            Some(n)
        }
        None => None,
    };

    let pool = db::require_pool()?;

    if let Some(ref name) = name {
        let duplicate: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM skills WHERE name = $1 AND id <> $2)")
                .bind(name)
                .bind(id)
                .fetch_one(pool.as_ref())
                .await?;
        if duplicate {
            return Err(ApiError::AlreadyExists(name.clone()));
        }
    }

    let updated = sqlx::query_as::<_, Skill>(&format!(
        r#"
        UPDATE skills
        SET name = COALESCE($1, name), updated_at = now()
        WHERE id = $2 AND owner_id = $3
        RETURNING {SKILL_COLUMNS}
        "#
    ))
    .bind(&name)
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool.as_ref())
    .await
    .map_err(|e| ApiError::on_unique_conflict(e, name.as_deref().unwrap_or("")))?
    .ok_or(ApiError::NotFound)?;

    tracing::info!("Skill updated: {}", updated.name);
    Ok(Json(updated.into()))
}

/// Cleanup-then-delete in one transaction: the skill's id is removed from
/// every referencing project's technology list, and the row is deleted only
/// if that succeeds. A cleanup failure, an absent id or a foreign owner rolls
/// everything back, so a still-referenced skill is never half-deleted.
/// Returns the deleted row and the number of projects scrubbed.
pub(crate) async fn delete_skill_owned(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
) -> Result<(Skill, u64), ApiError> {
    let mut tx = pool.begin().await?;

    // array_remove drops every occurrence of the id and touches nothing else
    // in the row, so concurrent edits to unrelated fields are not clobbered.
    let scrubbed = sqlx::query(
        r#"
        UPDATE projects
        SET technologies = array_remove(technologies, $1)
        WHERE $1 = ANY(technologies)
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let deleted = sqlx::query_as::<_, Skill>(&format!(
        "DELETE FROM skills WHERE id = $1 AND owner_id = $2 RETURNING {SKILL_COLUMNS}"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(deleted) = deleted else {
        // Absent or foreign-owned: roll back the scrub as well.
        tx.rollback().await?;
        return Err(ApiError::NotFound);
    };

    tx.commit().await?;

    Ok((deleted, scrubbed.rows_affected()))
}

/// DELETE /api/skills/:id - delete a skill (auth required, owner only).
pub async fn delete_skill(
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Json<SkillResponse>, ApiError> {
    let claims = require_auth(&headers)?;
    let owner_id = claims.owner_id()?;
    let id = parse_entity_id(&raw_id)?;
    let pool = db::require_pool()?;

    let (deleted, scrubbed) = delete_skill_owned(pool.as_ref(), id, owner_id).await?;

    tracing::info!(
        "Skill deleted: {} (removed from {} projects)",
        deleted.name,
        scrubbed
    );
    Ok(Json(deleted.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorResponse;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn skill_router() -> Router {
        Router::new()
            .route("/api/skills", get(list_skills).post(create_skill))
            .route(
                "/api/skills/{id}",
                axum::routing::patch(update_skill).delete(delete_skill),
            )
    }

    fn bearer() -> String {
        let token =
            create_access_token(&Uuid::new_v4().to_string(), "admin@example.com", "admin").unwrap();
        format!("Bearer {}", token)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, axum::body::Bytes) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    #[test]
    fn test_response_shape_uses_store_id_key() {
        let skill = Skill {
            id: Uuid::new_v4(),
            name: "React".to_string(),
            owner_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(SkillResponse::from(skill)).unwrap();
        assert!(json.get("_id").is_some());
        assert_eq!(json["name"], "React");
        assert!(json.get("ownerId").is_none());
    }

    #[tokio::test]
    async fn test_list_requires_auth() {
        let req = Request::get("/api/skills").body(Body::empty()).unwrap();
        let (status, _) = send(skill_router(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let req = Request::post("/api/skills")
            .header("content-type", "application/json")
            .header("authorization", bearer())
            .body(Body::from(r#"{"name": "   "}"#))
            .unwrap();
        let (status, _) = send(skill_router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_malformed_id_is_not_found() {
        let req = Request::delete("/api/skills/S1")
            .header("authorization", bearer())
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = send(skill_router(), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Not found");
    }

    #[tokio::test]
    async fn test_update_rejects_blank_name_before_lookup() {
        let req = Request::patch(format!("/api/skills/{}", Uuid::new_v4()))
            .header("content-type", "application/json")
            .header("authorization", bearer())
            .body(Body::from(r#"{"name": ""}"#))
            .unwrap();
        let (status, _) = send(skill_router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    async fn seed_skill(pool: &PgPool, owner: Uuid) -> Skill {
        sqlx::query_as::<_, Skill>(&format!(
            "INSERT INTO skills (name, owner_id) VALUES ($1, $2) RETURNING {SKILL_COLUMNS}"
        ))
        .bind(format!("skill-{}", Uuid::new_v4().simple()))
        .bind(owner)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_project(pool: &PgPool, owner: Uuid, technologies: &[Uuid]) -> Uuid {
        sqlx::query_scalar(
            r#"INSERT INTO projects
                   (title, description, technologies, image_url, image_storage_id, owner_id)
               VALUES ('Site', 'About', $1, '/uploads/images/p.png', 'p.png', $2)
               RETURNING id"#,
        )
        .bind(technologies.to_vec())
        .bind(owner)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn project_technologies(pool: &PgPool, id: Uuid) -> Vec<Uuid> {
        sqlx::query_scalar("SELECT technologies FROM projects WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn skill_exists(pool: &PgPool, id: Uuid) -> bool {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM skills WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delete_scrubs_only_the_deleted_id_from_every_project() {
        let Some(pool) = crate::db::connect_test_pool().await else {
            return;
        };

        let owner = Uuid::new_v4();
        let doomed = seed_skill(&pool, owner).await;
        let kept = seed_skill(&pool, owner).await;
        let p1 = seed_project(&pool, owner, &[kept.id, doomed.id, doomed.id]).await;
        let p2 = seed_project(&pool, owner, &[doomed.id, kept.id, kept.id]).await;

        let (deleted, scrubbed) = delete_skill_owned(&pool, doomed.id, owner).await.unwrap();
        assert_eq!(deleted.id, doomed.id);
        assert_eq!(scrubbed, 2);

        // Every occurrence of the deleted id goes; order and duplicates of
        // the survivors stay.
        assert_eq!(project_technologies(&pool, p1).await, vec![kept.id]);
        assert_eq!(project_technologies(&pool, p2).await, vec![kept.id, kept.id]);
        assert!(!skill_exists(&pool, doomed.id).await);
        assert!(skill_exists(&pool, kept.id).await);

        for project in [p1, p2] {
            sqlx::query("DELETE FROM projects WHERE id = $1")
                .bind(project)
                .execute(&pool)
                .await
                .unwrap();
        }
        sqlx::query("DELETE FROM skills WHERE id = $1")
            .bind(kept.id)
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_foreign_owner_delete_rolls_back_the_scrub() {
        let Some(pool) = crate::db::connect_test_pool().await else {
            return;
        };

        let owner = Uuid::new_v4();
        let skill = seed_skill(&pool, owner).await;
        let project = seed_project(&pool, owner, &[skill.id]).await;

        let result = delete_skill_owned(&pool, skill.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ApiError::NotFound)));

        // The whole transaction rolled back: skill present, reference intact.
        assert!(skill_exists(&pool, skill.id).await);
        assert_eq!(project_technologies(&pool, project).await, vec![skill.id]);

        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(project)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM skills WHERE id = $1")
            .bind(skill.id)
            .execute(&pool)
            .await
            .unwrap();
    }
}
