use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use stockledger_core::UserId;

use crate::app::errors::json_error;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-user-id";

/// Resolve the acting operator from `x-user-id` and attach it to the request.
///
/// Authentication happens upstream; this layer only refuses requests that
/// carry no usable identity.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_actor(req.headers()) {
        Ok(id) => id,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, "missing_actor", message),
    };

    req.extensions_mut().insert(ActorContext::new(user_id));
    next.run(req).await
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(ACTOR_HEADER)
        .ok_or("x-user-id header is required")?;

    let header = header.to_str().map_err(|_| "x-user-id is not valid text")?;

    let uuid = Uuid::parse_str(header.trim()).map_err(|_| "x-user-id must be a UUID")?;
    Ok(UserId::from_uuid(uuid))
}
