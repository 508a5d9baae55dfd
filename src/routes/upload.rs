/**
 * Upload Routes
 * Image asset storage on local disk. Entities hold the returned url plus the
 * storage id, which is what create-failure compensation and entity deletion
 * use to discard the asset again.
 */
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::require_auth;

const UPLOAD_DIR: &str = "uploads/images";
const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub storage_id: String,
    pub size: usize,
    pub mime_type: String,
}

fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: 52 49 46 46 ... 57 45 42 50
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_from_mime(mime: &str) -> &str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Storage ids are generated filenames; anything that could escape the
/// upload directory is rejected outright.
fn is_safe_storage_id(storage_id: &str) -> bool {
    !storage_id.is_empty()
        && !storage_id.contains("..")
        && !storage_id.contains('/')
        && !storage_id.contains('\\')
        && !storage_id.contains('\0')
}

/// Best-effort asset removal, used as compensation when a create fails after
/// its image was uploaded and as cleanup after a successful entity delete.
/// Failure here is logged and swallowed; the caller's own outcome stands.
pub async fn discard_stored_image(storage_id: &str) {
    if !is_safe_storage_id(storage_id) {
        tracing::warn!("Refusing to discard suspicious storage id: {}", storage_id);
        return;
    }
    let path = PathBuf::from(UPLOAD_DIR).join(storage_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::info!("Discarded stored image: {}", storage_id),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to discard stored image {}: {}", storage_id, e),
    }
}

/// POST /api/uploads - store an image (auth required)
pub async fn upload_image(
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers)?;

    let upload_path = PathBuf::from(UPLOAD_DIR);
    tokio::fs::create_dir_all(&upload_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create upload directory: {}", e)))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            tracing::debug!("Multipart error: {}", e);
            ApiError::validation("Invalid multipart data")
        })?
        .ok_or_else(|| ApiError::validation("No file provided"))?;

    let original_name = field.file_name().unwrap_or("unknown").to_string();
    let original_ext = original_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if !ALLOWED_EXTENSIONS.contains(&original_ext.as_str()) {
        return Err(ApiError::validation(
            "Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.",
        ));
    }

    let bytes = field.bytes().await.map_err(|e| {
        tracing::debug!("Failed to read upload bytes: {}", e);
        ApiError::validation("Failed to read file data")
    })?;

    if bytes.is_empty() {
        return Err(ApiError::validation("Empty file"));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::validation("File too large. Maximum size is 5MB."));
    }

    // The declared extension is advisory; the content decides.
    let mime_type = validate_image_magic_bytes(&bytes)
        .ok_or_else(|| ApiError::validation("File content does not match an allowed image type."))?;

    let storage_id = format!("{}.{}", Uuid::new_v4(), extension_from_mime(mime_type));
    let file_path = upload_path.join(&storage_id);

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to save file: {}", e)))?;

    let url = format!("/uploads/images/{}", storage_id);
    tracing::info!("Image uploaded: {} ({} bytes)", storage_id, bytes.len());

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url,
            storage_id,
            size: bytes.len(),
            mime_type: mime_type.to_string(),
        }),
    ))
}

/// DELETE /api/uploads/:storage_id - remove a stored image (auth required)
pub async fn delete_image(
    headers: HeaderMap,
    Path(storage_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers)?;

    if !is_safe_storage_id(&storage_id) {
        return Err(ApiError::validation("Invalid filename"));
    }

    let file_path = PathBuf::from(UPLOAD_DIR).join(&storage_id);
    if !file_path.exists() {
        return Err(ApiError::NotFound);
    }

    tokio::fs::remove_file(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to delete file {}: {}", storage_id, e)))?;

    tracing::info!("Image deleted: {}", storage_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn test_magic_bytes_detection() {
        assert_eq!(
            validate_image_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some("image/jpeg")
        );
        assert_eq!(
            validate_image_magic_bytes(&[0x89, 0x50, 0x4E, 0x47, 0x0D]),
            Some("image/png")
        );
        assert_eq!(
            validate_image_magic_bytes(&[0x47, 0x49, 0x46, 0x38, 0x39]),
            Some("image/gif")
        );
        assert_eq!(
            validate_image_magic_bytes(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            Some("image/webp")
        );
        assert_eq!(validate_image_magic_bytes(b"plain text"), None);
        assert_eq!(validate_image_magic_bytes(&[0xFF]), None);
    }

    #[test]
    fn test_storage_id_safety() {
        assert!(is_safe_storage_id("abc123.png"));
        assert!(!is_safe_storage_id("../etc/passwd"));
        assert!(!is_safe_storage_id("a/b.png"));
        assert!(!is_safe_storage_id("a\\b.png"));
        assert!(!is_safe_storage_id(""));
    }

    #[test]
    fn test_extension_from_mime() {
        assert_eq!(extension_from_mime("image/jpeg"), "jpg");
        assert_eq!(extension_from_mime("image/webp"), "webp");
        assert_eq!(extension_from_mime("application/zip"), "bin");
    }

    #[tokio::test]
    async fn test_upload_requires_auth() {
        let app = Router::new().route("/api/uploads", post(upload_image));
        let req = Request::post("/api/uploads")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_discard_missing_image_is_silent() {
        // NotFound is the expected steady state for compensation retries.
        discard_stored_image("00000000-0000-0000-0000-000000000000.png").await;
    }
}
