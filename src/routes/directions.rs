// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Server-side Google Directions proxy.
//!
//! Keeps the REST key off the clients. Upstream JSON is passed through
//! as-is with 200, including non-`OK` statuses, so the caller can decide to
//! fall back to OSRM.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/directions", get(get_directions))
}

/// Query string accepted by the proxy. Coordinates are `lat,lng` strings.
#[derive(Debug, Deserialize)]
pub struct DirectionsQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub mode: Option<String>,
}

async fn get_directions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DirectionsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = state.config.require_maps_key()?;

    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(origin), Some(destination)) = (non_empty(query.origin), non_empty(query.destination))
    else {
        return Err(AppError::InvalidInput(
            "origin and destination are required".to_string(),
        ));
    };
    let mode = non_empty(query.mode).unwrap_or_else(|| "driving".to_string());

    let response = state
        .http
        .get(&state.config.google_directions_url)
        .query(&[
            ("origin", origin.as_str()),
            ("destination", destination.as_str()),
            ("mode", mode.as_str()),
            ("region", state.config.directions_region.as_str()),
            ("language", state.config.directions_language.as_str()),
            ("key", key),
        ])
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Directions upstream request failed");
            AppError::Internal(anyhow::anyhow!("Directions request failed: {}", e))
        })?;

    let upstream_status = response.status();
    let data: serde_json::Value = response.json().await.map_err(|e| {
        tracing::warn!(status = %upstream_status, error = %e, "Directions upstream returned non-JSON");
        AppError::Upstream(format!("Google response was not JSON ({upstream_status})"))
    })?;

    tracing::debug!(
        upstream_status = %upstream_status,
        status = data.get("status").and_then(|s| s.as_str()).unwrap_or("?"),
        "Directions proxied"
    );
    Ok(Json(data))
}
