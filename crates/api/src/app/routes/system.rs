use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::dto::NotificationsQuery;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Notification envelopes delivered so far, oldest first.
pub async fn notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<NotificationsQuery>,
) -> impl IntoResponse {
    let after = query.after.unwrap_or(0);
    let envelopes: Vec<_> = services
        .notifications
        .delivered()
        .into_iter()
        .filter(|e| e.sequence_number() > after)
        .collect();
    Json(envelopes)
}
