use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{notifications, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param or Authorization header)
    let ws_routes = Router::new().route(
        "/ws/{room_id}",
        axum::routing::get(ws_handler::ws_upgrade),
    );

    // Authenticated routes (JWT required — Claims extractor validates token)
    let presence_routes = Router::new()
        .route(
            "/api/rooms/{room_id}/presence",
            axum::routing::get(presence::get_room_presence),
        )
        .route(
            "/api/presence/rooms",
            axum::routing::get(presence::get_my_rooms),
        )
        .route(
            "/api/notifications",
            axum::routing::post(notifications::push_notification),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(presence_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
