// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fare and geometry helpers.
//!
//! These never fail: bad input degrades to zero or an empty sequence.

use crate::models::GeoPoint;

/// Mean earth radius used by the apps' distance estimates.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Google polyline precision (1e5 scale).
const POLYLINE_PRECISION: u32 = 5;

/// Tariff parameters for [`fare_by_distance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareConfig {
    pub base: f64,
    pub per_km: f64,
    pub min_fare: f64,
    pub decimals: u32,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base: 0.8,
            per_km: 0.39,
            min_fare: 1.25,
            decimals: 2,
        }
    }
}

/// Haversine great-circle distance in kilometers.
///
/// Returns 0 when either point is not finite.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    if !a.is_finite() || !b.is_finite() {
        return 0.0;
    }

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let km = 2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin();

    if km.is_finite() {
        km
    } else {
        0.0
    }
}

/// `max(min_fare, base + per_km * max(0, km))`, rounded half away from zero.
///
/// An epsilon is added before rounding so values like `1.005` land on the
/// side a person would expect.
pub fn fare_by_distance(km: f64, config: &FareConfig) -> f64 {
    let km = if km.is_finite() && km > 0.0 { km } else { 0.0 };
    let raw = config.base + km * config.per_km;
    let min_fare = if config.min_fare.is_finite() {
        config.min_fare
    } else {
        0.0
    };
    let enforced = raw.max(min_fare);

    let factor = 10f64.powi(config.decimals.min(12) as i32);
    ((enforced + f64::EPSILON) * factor).round() / factor
}

/// Decode a Google encoded polyline into points.
///
/// Invalid input yields an empty vector.
pub fn decode_polyline(encoded: &str) -> Vec<GeoPoint> {
    if encoded.is_empty() {
        return Vec::new();
    }

    // Every value ends on a chunk without the 0x20 continuation bit; the
    // decoder would otherwise accept a string cut off mid-value.
    if encoded
        .as_bytes()
        .last()
        .is_some_and(|b| b.wrapping_sub(63) >= 0x20)
    {
        tracing::debug!("Discarding truncated polyline");
        return Vec::new();
    }

    match polyline::decode_polyline(encoded, POLYLINE_PRECISION) {
        Ok(line) => line.0.into_iter().map(GeoPoint::from).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Discarding undecodable polyline");
            Vec::new()
        }
    }
}

/// Rough driving time when no provider answered (25 km/h city average).
pub fn estimate_duration_min(km: f64) -> u32 {
    const CITY_SPEED_KMH: f64 = 25.0;
    if !km.is_finite() || km <= 0.0 {
        return 1;
    }
    ((km / CITY_SPEED_KMH * 60.0).round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_points_have_zero_distance() {
        let p = GeoPoint::new(-3.676, -79.002);
        assert_eq!(distance_km(p, p), 0.0);
    }

    #[test]
    fn test_distance_one_degree_of_longitude_at_equator() {
        let d = distance_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_distance_with_nan_is_zero() {
        let d = distance_km(GeoPoint::new(f64::NAN, 0.0), GeoPoint::new(0.0, 1.0));
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_fare_applies_minimum() {
        let config = FareConfig::default();
        assert_eq!(fare_by_distance(0.0, &config), 1.25);
        assert_eq!(fare_by_distance(0.5, &config), 1.25);
        assert_eq!(fare_by_distance(-3.0, &config), 1.25);
        assert_eq!(fare_by_distance(f64::NAN, &config), 1.25);
    }

    #[test]
    fn test_fare_formula_above_minimum() {
        let config = FareConfig::default();
        // 0.8 + 1.2 * 0.39 = 1.268
        assert_eq!(fare_by_distance(1.2, &config), 1.27);
        // 0.8 + 10 * 0.39 = 4.70
        assert_eq!(fare_by_distance(10.0, &config), 4.7);
    }

    #[test]
    fn test_fare_is_monotonic() {
        let config = FareConfig::default();
        let mut last = 0.0;
        for i in 0..500 {
            let km = i as f64 * 0.1;
            let fare = fare_by_distance(km, &config);
            assert!(fare >= config.min_fare);
            assert!(fare >= last, "fare decreased at {km} km");
            last = fare;
        }
    }

    #[test]
    fn test_fare_respects_decimals() {
        let config = FareConfig {
            decimals: 0,
            ..FareConfig::default()
        };
        assert_eq!(fare_by_distance(10.0, &config), 5.0);
    }

    #[test]
    fn test_decode_reference_polyline() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        assert_eq!(points.len(), 3);
        assert!((points[0].lat - 38.5).abs() < 1e-9);
        assert!((points[0].lng + 120.2).abs() < 1e-9);
        assert!((points[1].lat - 40.7).abs() < 1e-9);
        assert!((points[1].lng + 120.95).abs() < 1e-9);
        assert!((points[2].lat - 43.252).abs() < 1e-9);
        assert!((points[2].lng + 126.453).abs() < 1e-9);
    }

    #[test]
    fn test_decode_invalid_polyline_is_empty() {
        assert!(decode_polyline("").is_empty());
        assert!(decode_polyline("\u{1F600}").is_empty());
    }

    fn encode(points: &[GeoPoint]) -> String {
        polyline::encode_coordinates(
            points.iter().map(|p| geo::Coord { x: p.lng, y: p.lat }),
            POLYLINE_PRECISION,
        )
        .unwrap()
    }

    #[test]
    fn test_decode_returns_encoded_points() {
        let cases: Vec<Vec<GeoPoint>> = vec![
            vec![GeoPoint::new(-3.67612, -79.00245)],
            // Repeated point: zero deltas
            vec![
                GeoPoint::new(-3.67612, -79.00245),
                GeoPoint::new(-3.67612, -79.00245),
                GeoPoint::new(-3.67612, -79.00245),
            ],
            // Deltas of both signs, crossing the equator and the meridian
            vec![
                GeoPoint::new(0.00001, -0.00001),
                GeoPoint::new(-0.00002, 0.00003),
                GeoPoint::new(12.34567, -45.67891),
                GeoPoint::new(-33.44556, 151.20931),
                GeoPoint::new(0.0, 0.0),
            ],
            (0..40)
                .map(|i| GeoPoint::new(-3.676 - i as f64 * 0.00013, -79.002 + i as f64 * 0.00021))
                .collect(),
        ];

        for points in cases {
            let decoded = decode_polyline(&encode(&points));
            assert_eq!(decoded.len(), points.len());
            for (got, want) in decoded.iter().zip(&points) {
                assert!((got.lat - want.lat).abs() < 1e-9, "{got:?} != {want:?}");
                assert!((got.lng - want.lng).abs() < 1e-9, "{got:?} != {want:?}");
            }
        }
    }

    #[test]
    fn test_decode_truncated_polyline_is_empty() {
        // Cut inside the last longitude
        assert!(decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`").is_empty());
        // Last latitude without its longitude
        assert!(decode_polyline("_p~iF~ps|U_ulLnnqC_mqN").is_empty());
    }

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration_min(0.0), 1);
        assert_eq!(estimate_duration_min(12.5), 30);
    }
}
