/**
 * Error Taxonomy
 * Every route handler returns Result<_, ApiError>; this module maps each
 * failure class onto its HTTP status and the shared { "error": ... } body.
 */
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire shape of every error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authorization required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid credentials")]
    BadCredentials,

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    /// Covers both "no such entity" and "entity owned by another user".
    /// The two cases must stay indistinguishable to the caller.
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// A write rejected because it would duplicate a unique value
    /// (blog title or slug, skill name, user email).
    #[error("\"{0}\" already exists")]
    AlreadyExists(String),

    #[error("Internal server error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    /// Translate an insert/update failure: a unique-index violation becomes
    /// the conflict error naming `value`, anything else stays an internal
    /// failure. The unique index is the final arbiter when the application
    /// pre-check loses a race.
    pub fn on_unique_conflict(err: sqlx::Error, value: &str) -> Self {
        if is_unique_violation(&err) {
            ApiError::AlreadyExists(value.to_string())
        } else {
            ApiError::Database(err)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::InvalidToken | ApiError::BadCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Name of the violated unique constraint, when the error carries one.
/// Lets callers with several unique columns report the right value.
pub fn unique_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => db.constraint(),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Server-side detail stays in the logs; the client sees the generic
        // message for infrastructure failures.
        match &self {
            ApiError::Database(err) => tracing::error!("database failure: {}", err),
            ApiError::Internal(msg) => tracing::error!("internal failure: {}", msg),
            ApiError::Validation(msg) => tracing::debug!("request rejected: {}", msg),
            _ => {}
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_auth_errors_are_unauthorized() {
        assert_eq!(status_of(ApiError::MissingToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ApiError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ApiError::BadCredentials), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_found_is_404() {
        assert_eq!(status_of(ApiError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_and_conflict_are_400() {
        assert_eq!(
            status_of(ApiError::validation("Title is required")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::AlreadyExists("React".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_database_error_is_500() {
        assert_eq!(
            status_of(ApiError::Database(sqlx::Error::RowNotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflict_message_names_the_value() {
        let err = ApiError::AlreadyExists("Hello, World!".to_string());
        assert_eq!(err.to_string(), "\"Hello, World!\" already exists");
    }

    #[test]
    fn test_non_unique_sqlx_error_stays_internal() {
        let err = ApiError::on_unique_conflict(sqlx::Error::RowNotFound, "React");
        assert!(matches!(err, ApiError::Database(_)));
    }

    #[test]
    fn test_unique_constraint_absent_for_non_database_errors() {
        assert!(unique_constraint(&sqlx::Error::RowNotFound).is_none());
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let err = ApiError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.to_string(), "Internal server error");
    }
}
