use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// Error returned by HTTP handlers; rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(kindred_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
}

impl From<kindred_core::Error> for ApiError {
    fn from(err: kindred_core::Error) -> Self {
        match err {
            kindred_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            kindred_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            kindred_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::Error;

    fn status_of(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(Error::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(Error::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::Transport("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
