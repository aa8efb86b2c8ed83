//! Inkwell Sign API server.
//!
//! REST endpoints for:
//! - Account registration, login and saved signatures
//! - Document upload, field placement and lifecycle
//! - Publishing with per-recipient signing tokens
//! - The token-gated signing flow

use anyhow::Result;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

mod auth;
mod error;
mod handlers;
mod models;
mod state;

#[cfg(test)]
mod tests;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("esign_api=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    info!("Initializing Inkwell Sign API...");
    let state = AppState::new().await?;
    let state = Arc::new(state);

    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that always require a logged-in owner.
    let protected = Router::new()
        .route("/api/users/me", get(handlers::users::me))
        .route(
            "/api/users/signature",
            get(handlers::users::get_signature).post(handlers::users::upsert_signature),
        )
        .route("/api/documents/all", get(handlers::documents::list_documents))
        .route(
            "/api/documents/upload",
            post(handlers::documents::upload_document),
        )
        .route(
            "/api/documents/shared-with-me",
            get(handlers::documents::shared_with_me),
        )
        .route(
            "/api/documents/:id",
            get(handlers::documents::get_document)
                .patch(handlers::documents::update_document)
                .delete(handlers::documents::delete_document),
        )
        .route("/api/documents/:id/publish", post(handlers::publish::publish_document))
        .route(
            "/api/documents/:id/unpublish",
            post(handlers::publish::unpublish_document),
        )
        .route("/api/documents/:id/cancel", post(handlers::documents::cancel_document))
        .route("/api/documents/:id/export", get(handlers::documents::export_document))
        .route("/api/overview/stats", get(handlers::overview::stats))
        .route("/api/activity", get(handlers::overview::recent_activity))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // Routes reachable with a recipient signing token (or no credential at
    // all); the handlers check authorization themselves.
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route(
            "/api/documents/published/:publish_link",
            get(handlers::publish::published_document),
        )
        .route(
            "/api/documents/:id/tools",
            get(handlers::tools::list_tools).post(handlers::tools::replace_tools),
        )
        .route(
            "/api/documents/:id/tools/:tool_id",
            patch(handlers::tools::patch_tool).delete(handlers::tools::delete_tool),
        )
        .route("/api/documents/:id/sign", post(handlers::signing::sign_document))
        .route("/api/documents/:id/decline", post(handlers::signing::decline_document));

    let app = protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting Inkwell Sign API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
