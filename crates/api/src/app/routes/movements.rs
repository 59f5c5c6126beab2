use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use uuid::Uuid;

use stockledger_core::MovementId;
use stockledger_inventory::MovementFilter;

use crate::app::dto::{CancelRequest, MovementBody};
use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_movement).get(list_movements))
        .route("/process", post(process_movement))
        .route("/:id", get(get_movement))
        .route("/:id/submit", post(submit_movement))
        .route("/:id/approve", post(approve_movement))
        .route("/:id/complete", post(complete_movement))
        .route("/:id/cancel", post(cancel_movement))
        .route("/:id/reverse", post(reverse_movement))
}

/// Create a `draft` (or `pending` with `submit: true`) movement. Stock is untouched.
pub async fn create_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<MovementBody>,
) -> Response {
    let request = body.into_request(actor.user_id());
    let result = services.run(move |s| s.ledger.create_movement(request)).await;
    reply(StatusCode::CREATED, result)
}

/// Create and apply in one step.
pub async fn process_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<MovementBody>,
) -> Response {
    let request = body.into_request(actor.user_id());
    let result = services.run(move |s| s.ledger.process_movement(request)).await;
    reply(StatusCode::CREATED, result)
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(filter): Query<MovementFilter>,
) -> Response {
    let result = services.run(move |s| s.ledger.list_movements(&filter)).await;
    reply(StatusCode::OK, result)
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<Uuid>,
) -> Response {
    let id = MovementId::from_uuid(id);
    let result = services.run(move |s| s.ledger.get_movement(id)).await;
    reply(StatusCode::OK, result)
}

pub async fn submit_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let (id, by) = (MovementId::from_uuid(id), actor.user_id());
    let result = services.run(move |s| s.ledger.submit_movement(id, by)).await;
    reply(StatusCode::OK, result)
}

pub async fn approve_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let (id, by) = (MovementId::from_uuid(id), actor.user_id());
    let result = services.run(move |s| s.ledger.approve_movement(id, by)).await;
    reply(StatusCode::OK, result)
}

pub async fn complete_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let (id, by) = (MovementId::from_uuid(id), actor.user_id());
    let result = services.run(move |s| s.ledger.complete_movement(id, by)).await;
    reply(StatusCode::OK, result)
}

pub async fn cancel_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Response {
    let (id, by) = (MovementId::from_uuid(id), actor.user_id());
    let reason = body.and_then(|Json(b)| b.reason);
    let result = services
        .run(move |s| s.ledger.cancel_movement(id, by, reason))
        .await;
    reply(StatusCode::OK, result)
}

/// Draft the compensating correction for a completed movement.
pub async fn reverse_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<Uuid>,
) -> Response {
    let (id, by) = (MovementId::from_uuid(id), actor.user_id());
    let result = services.run(move |s| s.ledger.reverse_movement(id, by)).await;
    reply(StatusCode::CREATED, result)
}
