use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::service::GsError;

// https://github.com/tokio-rs/axum/blob/main/examples/error-handling/src/main.rs
//
// handlers return Result<Response, GsError> so that ? works all the way
// down through the channel round-trips, and the mapping from error class
// to status code lives in exactly one place

impl IntoResponse for GsError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match self {
            GsError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            GsError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            GsError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            GsError::RangeUnsatisfiable(msg) => (StatusCode::RANGE_NOT_SATISFIABLE, msg),
            GsError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            GsError::ChannelSend | GsError::ChannelRecv => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal communications error".to_string(),
            ),
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}
