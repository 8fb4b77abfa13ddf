use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

/// Application error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404
/// - InvalidState, Bad: 400
/// - Credential, Db, Io, Json: 500 (details stay in the server log)
#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Credential: {0}")]
    Credential(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppErr {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppErr::NotFound(_) => StatusCode::NOT_FOUND,
            AppErr::InvalidState(_) | AppErr::Bad(_) => StatusCode::BAD_REQUEST,
            AppErr::Credential(_) | AppErr::Io(_) | AppErr::Db(_) | AppErr::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppErr {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            AppErr::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            AppErr::InvalidState(msg) => ("INVALID_STATE", msg.clone()),
            AppErr::Bad(msg) => ("BAD_REQUEST", msg.clone()),
            AppErr::Credential(err) => {
                tracing::error!(target: "liveclass.credential", error = %err, "credential issuance failed");
                ("CREDENTIAL_ERROR", "could not issue a join credential".to_string())
            }
            other => {
                tracing::error!(target: "liveclass.internal", error = %other, "request failed");
                ("INTERNAL_ERROR", "an internal error occurred".to_string())
            }
        };
        let body = ErrorBody { error: ErrorDetail { code, message } };
        (self.status_code(), Json(body)).into_response()
    }
}

/* helpers: turn any displayable error into a variant */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }
pub fn not_found<E: Display>(e: E) -> AppErr { AppErr::NotFound(e.to_string()) }

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(not_found("room").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppErr::InvalidState("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(bad("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppErr::Credential("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn invalid_state_body_carries_message() {
        let resp = AppErr::InvalidState("class is not active".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "INVALID_STATE");
        assert_eq!(json["error"]["message"], "class is not active");
    }

    #[tokio::test]
    async fn db_error_is_not_leaked() {
        let resp = AppErr::Db(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"]["message"], "an internal error occurred");
    }
}
