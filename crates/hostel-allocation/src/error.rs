use crate::config::ConfigError;
use crate::housing::HousingError;
use crate::telemetry::TelemetryError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Housing(HousingError),
    RateLimited { retry_after_secs: u64 },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Housing(err) => match err {
                HousingError::Validation(_)
                | HousingError::GenderMismatch { .. }
                | HousingError::InvalidTransition { .. }
                | HousingError::Signature => StatusCode::BAD_REQUEST,
                HousingError::CapacityExceeded { .. }
                | HousingError::DuplicateAllocation { .. }
                | HousingError::Concurrent { .. } => StatusCode::CONFLICT,
                HousingError::NotFound { .. } => StatusCode::NOT_FOUND,
                HousingError::Gateway(_) => StatusCode::BAD_GATEWAY,
                HousingError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Housing(err) => write!(f, "{}", err),
            AppError::RateLimited { retry_after_secs } => {
                write!(f, "too many requests; retry in {retry_after_secs}s")
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Housing(err) => Some(err),
            AppError::RateLimited { .. } => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));

        match self {
            AppError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<HousingError> for AppError {
    fn from(value: HousingError) -> Self {
        Self::Housing(value)
    }
}
