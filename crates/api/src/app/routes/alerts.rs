use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use stockledger_core::AlertId;
use stockledger_inventory::AlertFilter;

use crate::app::dto::{ResolveAlertRequest, ScanExpiringQuery};
use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_alerts))
        .route("/scan-expiring", post(scan_expiring))
        .route("/:id/resolve", post(resolve_alert))
}

/// Open alerts by default, most severe first.
pub async fn list_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Query(filter): Query<AlertFilter>,
) -> Response {
    let result = services.run(move |s| s.ledger.list_alerts(&filter)).await;
    reply(StatusCode::OK, result)
}

pub async fn resolve_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveAlertRequest>>,
) -> Response {
    let (id, by) = (AlertId::from_uuid(id), actor.user_id());
    let note = body.and_then(|Json(b)| b.note);
    let result = services
        .run(move |s| s.ledger.resolve_alert(id, by, note))
        .await;
    reply(StatusCode::OK, result)
}

pub async fn scan_expiring(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ScanExpiringQuery>,
) -> Response {
    let today = query.today.unwrap_or_else(|| Utc::now().date_naive());
    let result = services.run(move |s| s.ledger.scan_expiring(today)).await;
    reply(StatusCode::OK, result)
}
