use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockledger_core::{ErrorKind, LedgerError};

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        LedgerError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        LedgerError::BatchNotFound { .. } => {
            json_error(StatusCode::BAD_REQUEST, "batch_not_found", message)
        }
        LedgerError::InsufficientStock {
            product_id,
            requested,
            available,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": message,
                "product_id": product_id,
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        LedgerError::SerialNotAvailable { .. } => {
            json_error(StatusCode::CONFLICT, "serial_not_available", message)
        }
        LedgerError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        other => match other.kind() {
            ErrorKind::Validation => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
            ErrorKind::Conflict => json_error(StatusCode::CONFLICT, "conflict", message),
            ErrorKind::Concurrency => (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(json!({
                    "error": "busy",
                    "message": message,
                    "retryable": true,
                })),
            )
                .into_response(),
            ErrorKind::Consistency => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "consistency_violation",
                message,
            ),
        },
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ProductId;

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (LedgerError::validation("bad"), StatusCode::BAD_REQUEST),
            (LedgerError::not_found("sku X"), StatusCode::NOT_FOUND),
            (
                LedgerError::InsufficientStock {
                    product_id: ProductId::new(),
                    requested: 5,
                    available: 1,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::conflict("dup"), StatusCode::CONFLICT),
            (LedgerError::busy("lock"), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::VersionConflict("v".into()), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::consistency("drift"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }
}
