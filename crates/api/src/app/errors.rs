use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use presenca_core::DomainError;
use presenca_infra::{ServiceError, StoreError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "Aula não encontrada")
        }
        ServiceError::ClassFull { capacity } => json_error_with_details(
            StatusCode::CONFLICT,
            "class_full",
            "Aula lotada",
            json!({ "max_participants": capacity }),
        ),
        ServiceError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        ServiceError::Unavailable(msg) => {
            tracing::error!(error = %msg, "request failed after retries");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "temporarily unavailable, try again",
            )
        }
        ServiceError::Internal(msg) => {
            tracing::error!(error = %msg, "internal error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    service_error_to_response(err.into())
}

pub fn validation_error(err: DomainError) -> axum::response::Response {
    service_error_to_response(err.into())
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

pub fn json_error_with_details(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: serde_json::Value,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "details": details,
        })),
    )
        .into_response()
}
