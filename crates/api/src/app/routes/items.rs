use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
};
use chrono::Utc;

use crate::app::dto::{self, RegisterItemRequest, ThresholdsRequest};
use crate::app::routes::reply;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_item).get(list_items))
        .route("/:sku", get(get_item))
        .route("/:sku/thresholds", put(update_thresholds))
}

pub async fn register_item(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RegisterItemRequest>,
) -> Response {
    let (new, meta) = body.into_parts();
    let result = services
        .run(move |s| {
            let product_id = new.product_id;
            let item = s.ledger.register_item(new)?;
            if let Some(meta) = meta {
                s.catalog.upsert(product_id, meta);
            }
            Ok(dto::item_to_json(&item, Utc::now().date_naive()))
        })
        .await;
    reply(StatusCode::CREATED, result)
}

pub async fn list_items(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let result = services
        .run(|s| {
            let today = Utc::now().date_naive();
            Ok(s.ledger
                .list_items()?
                .iter()
                .map(|item| dto::item_to_json(item, today))
                .collect::<Vec<_>>())
        })
        .await;
    reply(StatusCode::OK, result)
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(sku): Path<String>,
) -> Response {
    let result = services
        .run(move |s| {
            let item = s.ledger.get_item(&sku)?;
            Ok(dto::item_to_json(&item, Utc::now().date_naive()))
        })
        .await;
    reply(StatusCode::OK, result)
}

pub async fn update_thresholds(
    Extension(services): Extension<Arc<AppServices>>,
    Path(sku): Path<String>,
    Json(body): Json<ThresholdsRequest>,
) -> Response {
    let result = services
        .run(move |s| {
            let product_id = s.ledger.get_item(&sku)?.product_id();
            let item = s
                .ledger
                .update_thresholds(product_id, body.min_quantity, body.max_quantity)?;
            Ok(dto::item_to_json(&item, Utc::now().date_naive()))
        })
        .await;
    reply(StatusCode::OK, result)
}
