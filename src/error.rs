// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::config::ConfigError;
use crate::models::RideStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the ride core and the directions proxy.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Cannot move ride from {current} to {attempted}")]
    InvalidTransition {
        current: RideStatus,
        attempted: RideStatus,
    },

    /// Another driver won the claim race.
    #[error("Ride is no longer available")]
    AlreadyClaimed,

    #[error("Ride has already been rated")]
    AlreadyRated,

    #[error("Passenger already has an active ride")]
    ActiveRideExists,

    /// Both routing providers failed.
    #[error("Route provider error: {0}")]
    RouteProvider(String),

    /// Access-control rejection; usually a logic bug, not a transient failure.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Upstream answered with something that isn't a directions payload.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Server-side configuration needed by the request is missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Errors the end user should see as "offer no longer available" or a
    /// silent no-op rather than as a failure.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, AppError::AlreadyClaimed | AppError::AlreadyRated)
    }
}

/// JSON error body, shaped like a directions response so clients parse
/// every failure the same way.
#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", Some(msg.clone())),
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", Some(self.to_string()))
            }
            AppError::AlreadyClaimed => (StatusCode::CONFLICT, "ALREADY_CLAIMED", None),
            AppError::AlreadyRated => (StatusCode::CONFLICT, "ALREADY_RATED", None),
            AppError::ActiveRideExists => (StatusCode::CONFLICT, "ACTIVE_RIDE_EXISTS", None),
            AppError::RouteProvider(msg) => {
                (StatusCode::BAD_GATEWAY, "ROUTE_PROVIDER_ERROR", Some(msg.clone()))
            }
            AppError::PermissionDenied(msg) => {
                tracing::error!(error = %msg, "Permission denied");
                (StatusCode::FORBIDDEN, "PERMISSION_DENIED", None)
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", Some(msg.clone())),
            AppError::Config(err) => {
                tracing::error!(error = %err, "Request needs missing configuration");
                let code = match err {
                    ConfigError::Missing(_) => "NO_KEY",
                    ConfigError::Invalid(_) => "SERVER_ERROR",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, code, Some(err.to_string()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERVER_ERROR",
                    Some(err.to_string()),
                )
            }
        };

        let body = ErrorResponse {
            status: code.to_string(),
            error_message: message,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, AppError>;
