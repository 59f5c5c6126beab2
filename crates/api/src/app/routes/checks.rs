use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use uuid::Uuid;

use stockledger_core::CheckId;
use stockledger_inventory::{CheckScope, CountEntry};

use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_check).get(list_checks))
        .route("/:id", get(get_check))
        .route("/:id/start", post(start_check))
        .route("/:id/counts", post(record_count))
        .route("/:id/complete", post(complete_check))
        .route("/:id/approve", post(approve_check))
}

pub async fn create_check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(scope): Json<CheckScope>,
) -> Response {
    let by = actor.user_id();
    let result = services
        .run(move |s| s.ledger.create_stock_check(scope, by))
        .await;
    reply(StatusCode::CREATED, result)
}

pub async fn list_checks(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let result = services.run(|s| s.ledger.list_checks()).await;
    reply(StatusCode::OK, result)
}

pub async fn get_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<Uuid>,
) -> Response {
    let id = CheckId::from_uuid(id);
    let result = services.run(move |s| s.ledger.get_check(id)).await;
    reply(StatusCode::OK, result)
}

pub async fn start_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<Uuid>,
) -> Response {
    let id = CheckId::from_uuid(id);
    let result = services.run(move |s| s.ledger.start_check(id)).await;
    reply(StatusCode::OK, result)
}

/// Record one counted line. Live stock is not touched until approval.
pub async fn record_count(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
    Json(entry): Json<CountEntry>,
) -> Response {
    let (id, by) = (CheckId::from_uuid(id), actor.user_id());
    let result = services
        .run(move |s| s.ledger.record_count(id, entry, by))
        .await;
    reply(StatusCode::OK, result)
}

pub async fn complete_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<Uuid>,
) -> Response {
    let id = CheckId::from_uuid(id);
    let result = services.run(move |s| s.ledger.complete_check(id)).await;
    reply(StatusCode::OK, result)
}

pub async fn approve_check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let (id, by) = (CheckId::from_uuid(id), actor.user_id());
    let result = services.run(move |s| s.ledger.approve_check(id, by)).await;
    reply(StatusCode::OK, result)
}
