use std::fmt::Display;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use serde_repr::*;
use tracing::{error, warn};

use crate::error::Error;

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("{0}")]
    Any(#[from] anyhow::Error),
    #[error("bad request")]
    BadRequest(),
    #[error("internal server error")]
    InternalError(),
    /// The worker could not source a response, no cached fallback existed
    #[error("{0}")]
    Upstream(#[from] Error),
}

#[derive(Serialize_repr, Deserialize_repr, PartialEq, Debug)]
#[repr(u16)]
pub enum ErrorCode {
    Normal = 200,
    InternalError = 1000,
    BadRequest = 1001,
    UpstreamFailed = 1002,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorCode::*;

        let res = match self {
            Normal => "",
            InternalError => "Internal server error",
            BadRequest => "Bad request",
            UpstreamFailed => "Upstream request failed",
        };
        f.write_str(res)?;
        Ok(())
    }
}

/// Log and return INTERNAL_SERVER_ERROR
fn log_internal_error<T: Display>(err: T) -> (StatusCode, ErrorCode, String) {
    use ErrorCode::*;

    error!("{err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        InternalError,
        "internal server error".to_string(),
    )
}

// Tell axum how to convert `RouteError` into a response.
impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        use RouteError::*;

        let (status_code, code, err_message) = match self {
            Any(err) => log_internal_error(err),
            InternalError() => log_internal_error("internal server error"),
            BadRequest() => (
                StatusCode::BAD_REQUEST,
                ErrorCode::BadRequest,
                "bad request".to_string(),
            ),
            Upstream(err) => {
                warn!("no response available: {err}");
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorCode::UpstreamFailed,
                    err.to_string(),
                )
            }
        };
        let body = Json(json!({
            "code": code,
            "message": code.to_string(),
            "error": err_message
        }));
        (status_code, body).into_response()
    }
}

pub type RouteResult<T, E = RouteError> = Result<T, E>;
