use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use stockledger_core::LedgerResult;

use crate::app::errors;

pub mod alerts;
pub mod checks;
pub mod items;
pub mod movements;
pub mod orders;
pub mod system;

/// Router for every endpoint that acts on the ledger (actor required).
pub fn router() -> Router {
    Router::new()
        .route("/notifications", get(system::notifications))
        .nest("/items", items::router())
        .nest("/movements", movements::router())
        .nest("/checks", checks::router())
        .nest("/alerts", alerts::router())
        .nest("/orders", orders::router())
}

/// Serialize a ledger result, or map its error.
pub(crate) fn reply<T: Serialize>(status: StatusCode, result: LedgerResult<T>) -> axum::response::Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
