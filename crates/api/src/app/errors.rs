use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ets_core::EtsError;

pub fn status_for(err: &EtsError) -> StatusCode {
    match err {
        EtsError::Validation { .. }
        | EtsError::InvalidId(_)
        | EtsError::BadRequest(_)
        | EtsError::Unsupported(_) => StatusCode::BAD_REQUEST,
        EtsError::NotFound { .. } | EtsError::Expired { .. } => StatusCode::NOT_FOUND,
        EtsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        EtsError::Conflict(_) => StatusCode::CONFLICT,
        EtsError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EtsError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EtsError::Delivery { .. } => StatusCode::BAD_GATEWAY,
        EtsError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn ets_error_to_response(err: EtsError) -> axum::response::Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::warn!(error = %err, code = err.code(), "request failed");
    }
    json_error(status, err.code(), err.to_string())
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
