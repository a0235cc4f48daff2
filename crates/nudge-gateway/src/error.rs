//! HTTP mapping for [`NudgeError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use nudge_core::NudgeError;

/// Handler error: every failure leaves as `{ok: false, error}`.
#[derive(Debug)]
pub struct ApiError(pub NudgeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            NudgeError::InvalidRequest(_) | NudgeError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            NudgeError::ProvisioningUnavailable(_) => StatusCode::CONFLICT,
            NudgeError::NotConnected(_) | NudgeError::LoggedOut => StatusCode::SERVICE_UNAVAILABLE,
            NudgeError::SendFailed { .. } | NudgeError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<NudgeError> for ApiError {
    fn from(e: NudgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("⚠️ Request failed ({status}): {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({"ok": false, "error": self.0.to_string()})),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::types::ConnectionState;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (NudgeError::invalid_request("x"), StatusCode::BAD_REQUEST),
            (NudgeError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (
                NudgeError::ProvisioningUnavailable(ConnectionState::Connected),
                StatusCode::CONFLICT,
            ),
            (
                NudgeError::NotConnected(ConnectionState::Connecting),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (NudgeError::LoggedOut, StatusCode::SERVICE_UNAVAILABLE),
            (NudgeError::send_failed("628", "boom"), StatusCode::BAD_GATEWAY),
            (NudgeError::transport("reset"), StatusCode::BAD_GATEWAY),
            (NudgeError::store("locked"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
