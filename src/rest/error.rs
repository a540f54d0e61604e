use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Two-tier API error: client input errors map to 400 with a fixed payload,
/// storage failures surface as 500 with the raw error message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// POST body is missing `task` or `status` (absent or empty).
    #[error("Please provide task/status")]
    MissingFields,
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFields => StatusCode::BAD_REQUEST,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": true, "message": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_maps_to_400() {
        let err = ApiError::MissingFields;
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Please provide task/status");
    }

    #[test]
    fn database_error_maps_to_500_with_raw_message() {
        let err = ApiError::from(anyhow::anyhow!("disk I/O error"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "disk I/O error");
    }

    #[tokio::test]
    async fn into_response_carries_the_error_envelope() {
        let resp = ApiError::MissingFields.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "Please provide task/status");
    }
}
