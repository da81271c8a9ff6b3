//! API route definitions

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{dispatch_routes, trip_routes, ws_handler, AppState};

/// Build the application router
pub fn build_router(state: AppState, cors_enabled: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/dispatches", dispatch_routes())
        .nest("/api/trips", trip_routes())
        .route("/api/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
