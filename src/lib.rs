//! Portfolio API - library for app logic and testing

pub mod db;
pub mod error;
pub mod logging;
pub mod routes;
pub mod slug;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local dev frontend.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                "http://localhost:3000".parse().unwrap(),
                "http://127.0.0.1:3000".parse().unwrap(),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app() -> Router {
    let cors = configure_cors();
    tracing::info!("CORS configured");

    Router::new()
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/verify", post(routes::auth::verify_token))
        .route(
            "/api/auth/forgot-password",
            post(routes::auth::forgot_password),
        )
        .route(
            "/api/auth/reset-password",
            post(routes::auth::reset_password),
        )
        .route(
            "/api/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(routes::projects::get_project)
                .patch(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route(
            "/api/blogs",
            get(routes::blogs::list_blogs).post(routes::blogs::create_blog),
        )
        .route(
            "/api/blogs/{key}",
            get(routes::blogs::get_blog)
                .patch(routes::blogs::update_blog)
                .delete(routes::blogs::delete_blog),
        )
        .route(
            "/api/skills",
            get(routes::skills::list_skills).post(routes::skills::create_skill),
        )
        .route(
            "/api/skills/{id}",
            axum::routing::patch(routes::skills::update_skill)
                .delete(routes::skills::delete_skill),
        )
        .route("/api/uploads", post(routes::upload::upload_image))
        .route(
            "/api/uploads/{storage_id}",
            axum::routing::delete(routes::upload::delete_image),
        )
        .route("/health", get(routes::health::health_ping))
        .route("/health/database", get(routes::health::health_database))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        // Compress responses with gzip/br/zstd automatically
        .layer(CompressionLayer::new())
        // Global request body cap; uploads are separately capped at 5 MB
        .layer(RequestBodyLimitLayer::new(8 * 1024 * 1024))
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() {
    dotenvy::dotenv().ok();

    // Guards MUST be held for the programme's lifetime; dropping them early
    // shuts down background log-writer threads and loses buffered log lines.
    let _log_guards = logging::init();

    // Refuse to start in production with the insecure default JWT secret.
    let environment = std::env::var("ENVIRONMENT").unwrap_or_default();
    if environment == "production" {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        if secret.is_empty() || secret == "default-jwt-secret-change-in-production" {
            panic!(
                "FATAL: JWT_SECRET must be set to a secure, unique value in production. \
                 Refusing to start with the default secret."
            );
        }
    }

    if std::env::var("DATABASE_URL").is_ok() {
        match db::init_pool(None).await {
            Ok(pool) => {
                if let Err(e) = db::run_migrations(&pool).await {
                    tracing::error!("Failed to run database migrations: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize database pool: {}. Continuing without database.",
                    e
                );
            }
        }
    } else {
        tracing::info!("DATABASE_URL not set. Running without database connection.");
    }

    let app = create_app();

    // Bind address is configurable via HOST / PORT env vars, defaulting to
    // 127.0.0.1:3001 so existing dev setups keep working unchanged.
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3001);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid HOST/PORT configuration");
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_app_returns_router() {
        let _app = create_app();
        // Just test that it compiles and doesn't panic
    }
}
