use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Auth Errors
    #[error("No token provided")]
    AuthFailNoToken,
    #[error("Auth token wrong format")]
    AuthFailTokenWrongFormat,
    #[error("Invalid or expired token")]
    AuthFailInvalidToken,
    #[error("Auth context missing")]
    AuthFailCtxNotInRequestExt,

    // Account Errors
    #[error("Please fill all the fields")]
    MissingFields,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("User not found")]
    UserNotFound,

    // Message Errors
    #[error("Message not found")]
    MessageNotFound,
    #[error("Message must have text or an image")]
    EmptyMessage,

    // Generic
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::AuthFailNoToken
            | Error::AuthFailTokenWrongFormat
            | Error::AuthFailInvalidToken => StatusCode::UNAUTHORIZED,
            Error::AuthFailCtxNotInRequestExt | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::MissingFields
            | Error::UserAlreadyExists
            | Error::InvalidCredentials
            | Error::EmptyMessage => StatusCode::BAD_REQUEST,
            Error::UserNotFound | Error::MessageNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            Error::Internal(detail) => {
                error!("Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::AuthFailNoToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::UserAlreadyExists.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::MessageNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_exposed() {
        let response = Error::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "Internal server error");
        assert!(!String::from_utf8_lossy(&bytes).contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_client_error_carries_message() {
        let response = Error::UserAlreadyExists.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "User already exists");
    }
}
