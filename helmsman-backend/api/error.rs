//! Component-error to HTTP translation (the only place status codes are
//! decided).

use axum::Json;
use hyper::StatusCode;
use serde_json::{Value, json};

use crate::error::ControlError;

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<T, ApiError>;

pub fn api_error(err: ControlError) -> ApiError {
    let status = match &err {
        ControlError::Validation(_) => StatusCode::BAD_REQUEST,
        ControlError::NotFound { .. } => StatusCode::NOT_FOUND,
        ControlError::Conflict(_) => StatusCode::CONFLICT,
        ControlError::TokenInvalid | ControlError::TokenExpired => StatusCode::UNAUTHORIZED,
        ControlError::Remote(_) | ControlError::Timeout(_) => StatusCode::BAD_GATEWAY,
        ControlError::Decrypt
        | ControlError::Database(_)
        | ControlError::Io(_)
        | ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

pub fn vault_disabled() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "credential vault disabled: ENCRYPTION_KEY not configured" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        let cases = [
            (
                ControlError::Validation("bad cron".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ControlError::not_found("node", "n1"),
                StatusCode::NOT_FOUND,
            ),
            (
                ControlError::Conflict("already assigned".into()),
                StatusCode::CONFLICT,
            ),
            (ControlError::TokenInvalid, StatusCode::UNAUTHORIZED),
            (ControlError::TokenExpired, StatusCode::UNAUTHORIZED),
            (
                ControlError::Remote("rsync exit 23".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (ControlError::Decrypt, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, _) = api_error(err);
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn token_errors_reveal_only_invalid_vs_expired() {
        let (_, body) = api_error(ControlError::TokenInvalid);
        assert_eq!(body.0["error"], "invalid token");
        let (_, body) = api_error(ControlError::TokenExpired);
        assert_eq!(body.0["error"], "token expired");
    }
}
