/// HTTP server.
///
/// Mounts the JSON API on an axum router with permissive-origin CORS and
/// request tracing, and shuts down gracefully on Ctrl+C or SIGTERM.
use anyhow::{Context, Result};
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod extract;
pub mod routes;

use crate::service::App;
use auth::{USER_EMAIL_HEADER, USER_ID_HEADER};

pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_EMAIL_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/tiktok/profiles",
            get(routes::list_profiles).post(routes::add_profile),
        )
        .route(
            "/api/tiktok/profiles/{username}",
            delete(routes::remove_profile),
        )
        .route(
            "/api/tiktok/profiles/{username}/refresh",
            post(routes::refresh_profile),
        )
        .route(
            "/api/tiktok/analytics/{username}",
            get(routes::profile_analytics),
        )
        .route("/api/tiktok/refresh-all", post(routes::refresh_all))
        .route("/api/tiktok/refresh-status", get(routes::refresh_status))
        .route("/api/teams", get(routes::list_teams).post(routes::create_team))
        .route("/api/teams/{id}/members", get(routes::team_members))
        .route(
            "/api/teams/{id}/members/{member_id}",
            patch(routes::update_member_role).delete(routes::remove_member),
        )
        .route(
            "/api/teams/{id}/invitations",
            get(routes::list_invitations).post(routes::invite_member),
        )
        .route(
            "/api/invitations/{token}/accept",
            post(routes::accept_invitation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

/// Binds `addr` and serves until a shutdown signal arrives.
pub async fn serve(app: Arc<App>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    tracing::info!("Server running on http://{}", local);

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
