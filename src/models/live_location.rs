// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Per-actor live position document.

use crate::models::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Stored at `liveLocations/{uid}`. Never deleted; stopping tracking only
/// clears `rideId` and `isDriving`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LiveLocation {
    pub uid: String,
    #[serde(default)]
    pub ride_id: Option<String>,
    /// Absent until the first accepted sample
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub is_driving: bool,
    pub updated_at: DateTime<Utc>,
}

impl LiveLocation {
    pub fn at_point(
        uid: impl Into<String>,
        ride_id: Option<String>,
        point: GeoPoint,
        is_driving: bool,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uid: uid.into(),
            ride_id,
            lat: Some(point.lat),
            lng: Some(point.lng),
            is_driving,
            updated_at,
        }
    }

    /// Last known position, if any sample was ever accepted.
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}
