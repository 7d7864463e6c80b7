use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::Delivery;

#[derive(Debug, Deserialize)]
pub struct PushNotificationRequest {
    pub user_id: String,
    pub notification: Value,
}

#[derive(Debug, Serialize)]
pub struct PushNotificationResponse {
    pub delivered: bool,
}

/// POST /api/notifications — Push a notification to a connected user. JWT auth required.
/// Body: { "user_id": "...", "notification": { "title": "...", "message": "..." } }
/// Offline users are not an error: the response reports `delivered: false`.
/// The caller's user id is stamped into the notification as `from`,
/// replacing any `from` the body carried.
pub async fn push_notification(
    State(state): State<AppState>,
    claims: Claims,
    Json(mut req): Json<PushNotificationRequest>,
) -> Result<Json<PushNotificationResponse>, (StatusCode, String)> {
    if let Value::Object(fields) = &mut req.notification {
        fields.insert("from".to_string(), Value::String(claims.sub.clone()));
    }
    let delivery = state.engine.notify_user(&req.user_id, req.notification);

    tracing::debug!(
        sender = %claims.sub,
        user_id = %req.user_id,
        delivery = ?delivery,
        "Notification pushed"
    );

    match delivery {
        Delivery::Rejected => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Notification needs a title, message or content".to_string(),
        )),
        other => Ok(Json(PushNotificationResponse {
            delivered: other.is_delivered(),
        })),
    }
}
