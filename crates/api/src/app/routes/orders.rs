use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::post,
};

use stockledger_infra::FulfillmentOutcome;

use crate::app::dto::ReserveOrderRequest;
use crate::app::routes::reply;
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route("/:order_id/reserve", post(reserve_order))
}

/// Deduct stock for an order, or report a backorder (nothing deducted).
pub async fn reserve_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(order_id): Path<String>,
    Json(body): Json<ReserveOrderRequest>,
) -> Response {
    let by = actor.user_id();
    let result = services
        .run(move |s| s.ledger.reserve_for_order(&order_id, body.lines, by))
        .await;
    let status = match &result {
        Ok(FulfillmentOutcome::Backorder { .. }) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    reply(status, result)
}
