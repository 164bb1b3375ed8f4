// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! WGS84 coordinate type used by every document.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// A geographic point in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct GeoPoint {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Validate the point for use as a request input.
    ///
    /// NaN slips through range checks, so finiteness is tested first.
    pub fn checked(self) -> Result<Self, AppError> {
        if !self.is_finite() {
            return Err(AppError::InvalidInput(format!(
                "coordinates must be numeric (got {}, {})",
                self.lat, self.lng
            )));
        }
        self.validate()
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        Ok(self)
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Point::new(p.lng, p.lat)
    }
}

impl From<geo::Coord<f64>> for GeoPoint {
    fn from(c: geo::Coord<f64>) -> Self {
        Self { lat: c.y, lng: c.x }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_accepts_valid_point() {
        let p = GeoPoint::new(-3.676, -79.002);
        assert_eq!(p.checked().unwrap(), p);
    }

    #[test]
    fn test_checked_rejects_nan() {
        let p = GeoPoint::new(f64::NAN, -79.0);
        assert!(matches!(p.checked(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_checked_rejects_out_of_range() {
        assert!(GeoPoint::new(91.0, 0.0).checked().is_err());
        assert!(GeoPoint::new(0.0, -180.5).checked().is_err());
    }

    #[test]
    fn test_geo_point_conversion_swaps_axes() {
        let p: geo::Point<f64> = GeoPoint::new(1.5, 2.5).into();
        assert_eq!(p.x(), 2.5);
        assert_eq!(p.y(), 1.5);
    }
}
