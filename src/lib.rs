// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Ride-sync: ride lifecycle and live location core for a ride-hailing app
//!
//! The library holds the ride state machine, the live location publisher,
//! route lookup with fallback and fare math, all written against the
//! [`db::RideStore`] abstraction. The binary serves the directions proxy
//! that keeps the Google key on the server.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;

/// Shared state for the directions proxy.
pub struct AppState {
    pub config: Config,
    /// Client for upstream Google calls
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, error::AppError> {
        let http = services::directions::http_client(config.route_timeout)?;
        Ok(Self { config, http })
    }
}
