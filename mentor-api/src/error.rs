use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use mentor_core::MentorError;
use serde_json::json;

/// Wraps a [`MentorError`] so handlers can return it with `?`.
#[derive(Debug)]
pub struct ApiError(pub MentorError);

impl<E> From<E> for ApiError
where
    E: Into<MentorError>,
{
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }

        let body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_error_kind() {
        let res = ApiError(MentorError::Conflict("taken".to_string())).into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = ApiError(MentorError::ProviderUnavailable("down".to_string())).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let res = ApiError(MentorError::Internal(anyhow::anyhow!("pg: secret detail"))).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
