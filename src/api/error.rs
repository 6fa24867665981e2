use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::core::SimError;

/// Errors surfaced by the HTTP and CLI front ends.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Simulation(#[from] SimError),

    #[error("invalid request payload: {0}")]
    Payload(String),

    #[error("cannot read parameter file {path}: {message}")]
    ParamsFile { path: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Payload(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Simulation(SimError::Config { .. }) | ApiError::Payload(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Simulation(SimError::EmptyInput(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Simulation(SimError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ParamsFile { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let field = match self {
            ApiError::Simulation(err) => err.field().map(str::to_string),
            _ => None,
        };
        ErrorResponse {
            error: self.to_string(),
            field,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed");
        }
        json_response(status, self.body())
    }
}

pub fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

pub fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            field: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_errors_map_to_distinct_statuses() {
        let config: ApiError = SimError::config("endAge", "bad").into();
        assert_eq!(config.status(), StatusCode::BAD_REQUEST);
        assert_eq!(config.body().field.as_deref(), Some("endAge"));

        let empty: ApiError = SimError::empty("no years").into();
        assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(empty.body().field, None);

        let cancelled: ApiError = SimError::Cancelled.into();
        assert_eq!(cancelled.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn error_body_serializes_without_empty_field() {
        let body = ApiError::Payload("missing brace".to_string()).body();
        let json = serde_json::to_value(&body).expect("serializes");
        assert_eq!(json["error"], "invalid request payload: missing brace");
        assert!(json.get("field").is_none());
    }

    #[test]
    fn responses_are_not_cached() {
        let response = error_response(StatusCode::NOT_FOUND, "Not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
