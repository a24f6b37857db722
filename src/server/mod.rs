pub mod auth;
pub mod cluster;
pub mod error;
pub mod rollout;
pub mod settings;
pub mod state;
pub mod status;
pub mod tenant;
pub mod workload;

use anyhow::Result;
use axum::{middleware, Router};
use state::AppState;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// All routes, with authentication applied to everything but health and registration.
pub fn router(state: AppState) -> Router {
    // Public routes (no authentication)
    let public_routes = Router::new()
        .route("/version", axum::routing::get(version_info))
        .merge(tenant::routes::public_routes());

    // Protected routes (require a bearer token)
    let protected_routes = Router::new()
        .merge(workload::routes::routes())
        .merge(rollout::routes::routes())
        .merge(status::routes::routes())
        .merge(tenant::routes::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::auth_middleware,
        ));

    let api_routes = public_routes.merge(protected_routes);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Run the HTTP server until SIGINT or SIGTERM
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let state = AppState::new_for_server(&settings).await?;
    let app = router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn version_info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
