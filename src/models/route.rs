// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Driving route snapshot as cached on a ride.

use crate::models::GeoPoint;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Where a route came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum RouteSource {
    Google,
    Osrm,
    /// Synthesized from the haversine distance when no provider answered.
    StraightLine,
}

/// Whether a route follows real streets or is only an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum RouteQuality {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "approx")]
    Approximate,
}

/// A driving route between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Route {
    pub coords: Vec<GeoPoint>,
    pub distance_km: f64,
    /// Always at least 1.
    pub duration_min: u32,
    pub provider: RouteSource,
    pub quality: RouteQuality,
}

impl Route {
    /// Route returned by a real routing provider.
    pub fn from_provider(
        provider: RouteSource,
        coords: Vec<GeoPoint>,
        distance_meters: f64,
        duration_secs: f64,
    ) -> Self {
        Self {
            coords,
            distance_km: (distance_meters / 1000.0).max(0.0),
            duration_min: minutes_from_secs(duration_secs),
            provider,
            quality: RouteQuality::Exact,
        }
    }

    /// Two-point estimate between `origin` and `destination`.
    pub fn straight_line(
        origin: GeoPoint,
        destination: GeoPoint,
        distance_km: f64,
        duration_min: u32,
    ) -> Self {
        Self {
            coords: vec![origin, destination],
            distance_km: distance_km.max(0.0),
            duration_min: duration_min.max(1),
            provider: RouteSource::StraightLine,
            quality: RouteQuality::Approximate,
        }
    }

    pub fn is_approximate(&self) -> bool {
        self.quality == RouteQuality::Approximate
    }
}

/// Round seconds to whole minutes, never below one.
fn minutes_from_secs(secs: f64) -> u32 {
    if !secs.is_finite() || secs <= 0.0 {
        return 1;
    }
    ((secs / 60.0).round() as u32).max(1)
}
