// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Driving route lookup with a primary and a fallback provider.
//!
//! Handles:
//! - Google Directions (through the `/api/directions` proxy) as primary
//! - OSRM `route/v1/driving` as fallback
//! - Rejecting straight two-point "routes" from either provider
//! - Synthesizing an approximate route when both fail

use crate::error::AppError;
use crate::models::{GeoPoint, Route, RouteSource};
use crate::services::fare::{decode_polyline, distance_km, estimate_duration_min};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Fewer points than this is a straight line, not a street route.
pub const MIN_ROUTE_COORDS: usize = 4;

/// Errors from a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum DirectionsError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {0}")]
    HttpStatus(u16),

    #[error("provider status {status}: {message}")]
    Provider { status: String, message: String },

    #[error("provider returned no routes")]
    NoRoutes,

    #[error("route has only {0} coordinates")]
    TooFewCoordinates(usize),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DirectionsError {
    fn is_timeout(&self) -> bool {
        matches!(self, DirectionsError::Http(e) if e.is_timeout())
    }
}

/// A routing backend.
pub trait RouteProvider: Send + Sync {
    fn source(&self) -> RouteSource;

    fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> impl Future<Output = Result<Route, DirectionsError>> + Send;
}

/// Build the shared HTTP client with the per-call timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Google Directions (primary)
// ─────────────────────────────────────────────────────────────────────────────

/// Directions response as relayed by the proxy.
#[derive(Debug, Deserialize)]
pub struct GoogleDirectionsResponse {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub routes: Vec<GoogleRoute>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleRoute {
    #[serde(default)]
    pub legs: Vec<GoogleLeg>,
    #[serde(default)]
    pub overview_polyline: Option<GooglePolyline>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLeg {
    #[serde(default)]
    pub distance: Option<GoogleValue>,
    #[serde(default)]
    pub duration: Option<GoogleValue>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleValue {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct GooglePolyline {
    pub points: String,
}

/// Turn a directions payload into a route, enforcing the coordinate minimum.
pub fn parse_google_response(body: GoogleDirectionsResponse) -> Result<Route, DirectionsError> {
    if body.status != "OK" {
        return Err(DirectionsError::Provider {
            message: body.error_message.unwrap_or_default(),
            status: body.status,
        });
    }

    let route = body.routes.into_iter().next().ok_or(DirectionsError::NoRoutes)?;
    let leg = route.legs.first();
    let meters = leg.and_then(|l| l.distance.as_ref()).map_or(0.0, |v| v.value);
    let seconds = leg.and_then(|l| l.duration.as_ref()).map_or(0.0, |v| v.value);

    let coords = route
        .overview_polyline
        .map(|p| decode_polyline(&p.points))
        .unwrap_or_default();

    if coords.len() < MIN_ROUTE_COORDS {
        return Err(DirectionsError::TooFewCoordinates(coords.len()));
    }

    Ok(Route::from_provider(
        RouteSource::Google,
        coords,
        meters,
        seconds,
    ))
}

/// Client for the directions proxy (`GET ?origin=lat,lng&destination=lat,lng&mode=driving`).
#[derive(Clone)]
pub struct GoogleDirectionsClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GoogleDirectionsClient {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

impl RouteProvider for GoogleDirectionsClient {
    fn source(&self) -> RouteSource {
        RouteSource::Google
    }

    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> Result<Route, DirectionsError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("origin", format!("{},{}", origin.lat, origin.lng)),
                ("destination", format!("{},{}", destination.lat, destination.lng)),
                ("mode", "driving".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        // The proxy answers errors with a directions-shaped JSON body too.
        let body: Option<GoogleDirectionsResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            return Err(match body {
                Some(b) => DirectionsError::Provider {
                    message: b.error_message.unwrap_or_default(),
                    status: b.status,
                },
                None => DirectionsError::HttpStatus(status.as_u16()),
            });
        }

        let body = body.ok_or_else(|| {
            DirectionsError::InvalidResponse(text.chars().take(250).collect::<String>())
        })?;
        parse_google_response(body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OSRM (fallback)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OsrmRouteResponse {
    pub code: String,
    #[serde(default)]
    pub routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmRoute {
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub geometry: Option<geojson::Geometry>,
}

/// Turn an OSRM payload (GeoJSON geometry) into a route.
pub fn parse_osrm_response(body: OsrmRouteResponse) -> Result<Route, DirectionsError> {
    if body.code != "Ok" {
        return Err(DirectionsError::Provider {
            status: body.code,
            message: "OSRM returned no route".to_string(),
        });
    }

    let route = body.routes.into_iter().next().ok_or(DirectionsError::NoRoutes)?;

    let coords: Vec<GeoPoint> = match route.geometry {
        Some(geometry) => {
            let line: geo::LineString<f64> = geometry
                .value
                .try_into()
                .map_err(|e: geojson::Error| DirectionsError::InvalidResponse(e.to_string()))?;
            line.0
                .into_iter()
                .map(GeoPoint::from)
                .filter(GeoPoint::is_finite)
                .collect()
        }
        None => Vec::new(),
    };

    if coords.len() < MIN_ROUTE_COORDS {
        return Err(DirectionsError::TooFewCoordinates(coords.len()));
    }

    Ok(Route::from_provider(
        RouteSource::Osrm,
        coords,
        route.distance.unwrap_or(0.0),
        route.duration.unwrap_or(0.0),
    ))
}

/// Client for an OSRM server.
#[derive(Clone)]
pub struct OsrmClient {
    http: reqwest::Client,
    base_url: String,
}

impl OsrmClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl RouteProvider for OsrmClient {
    fn source(&self) -> RouteSource {
        RouteSource::Osrm
    }

    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> Result<Route, DirectionsError> {
        // OSRM wants lng,lat
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}",
            self.base_url, origin.lng, origin.lat, destination.lng, destination.lat
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("overview", "full"),
                ("geometries", "geojson"),
                ("steps", "false"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DirectionsError::HttpStatus(response.status().as_u16()));
        }

        let body: OsrmRouteResponse = response
            .json()
            .await
            .map_err(|e| DirectionsError::InvalidResponse(e.to_string()))?;
        parse_osrm_response(body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DirectionsService - primary with single fallback
// ─────────────────────────────────────────────────────────────────────────────

/// Route lookup: one primary attempt, one fallback attempt, no retries.
#[derive(Clone)]
pub struct DirectionsService<P = GoogleDirectionsClient, F = OsrmClient> {
    primary: P,
    fallback: F,
}

impl DirectionsService {
    /// Build the standard Google → OSRM chain from configuration.
    pub fn from_config(config: &crate::config::Config) -> Result<Self, AppError> {
        let http = http_client(config.route_timeout)?;
        Ok(Self::new(
            GoogleDirectionsClient::new(http.clone(), &config.directions_api_url),
            OsrmClient::new(http, &config.osrm_url),
        ))
    }
}

impl<P: RouteProvider, F: RouteProvider> DirectionsService<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// Fetch a driving route.
    ///
    /// Fails with `InvalidInput` for non-numeric points and `RouteProvider`
    /// when both providers fail.
    pub async fn get_route(&self, origin: GeoPoint, destination: GeoPoint) -> Result<Route, AppError> {
        let origin = origin.checked()?;
        let destination = destination.checked()?;

        match self.primary.route(origin, destination).await {
            Ok(route) if route.coords.len() >= MIN_ROUTE_COORDS => {
                tracing::debug!(
                    provider = ?self.primary.source(),
                    coords = route.coords.len(),
                    "Primary route accepted"
                );
                return Ok(route);
            }
            Ok(route) => {
                tracing::info!(
                    provider = ?self.primary.source(),
                    coords = route.coords.len(),
                    "Primary route too coarse, using fallback"
                );
            }
            Err(e) => {
                tracing::info!(
                    provider = ?self.primary.source(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "Primary route failed, using fallback"
                );
            }
        }

        match self.fallback.route(origin, destination).await {
            Ok(route) if route.coords.len() >= MIN_ROUTE_COORDS => Ok(route),
            Ok(route) => Err(AppError::RouteProvider(
                DirectionsError::TooFewCoordinates(route.coords.len()).to_string(),
            )),
            Err(e) => {
                tracing::warn!(
                    provider = ?self.fallback.source(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "Fallback route failed"
                );
                Err(AppError::RouteProvider(e.to_string()))
            }
        }
    }

    /// Like [`get_route`](Self::get_route) but never fails on provider
    /// outages: a straight-line estimate flagged approximate is returned.
    pub async fn route_or_estimate(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Route, AppError> {
        match self.get_route(origin, destination).await {
            Err(AppError::RouteProvider(reason)) => {
                tracing::warn!(reason = %reason, "Using approximate straight-line route");
                Ok(straight_line_route(origin, destination))
            }
            other => other,
        }
    }
}

/// Two-point haversine estimate, always flagged approximate.
pub fn straight_line_route(origin: GeoPoint, destination: GeoPoint) -> Route {
    let km = distance_km(origin, destination);
    Route::straight_line(origin, destination, km, estimate_duration_min(km))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RouteQuality;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider returning a canned result and counting calls.
    struct FakeProvider {
        source: RouteSource,
        coords: Option<usize>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        fn new(source: RouteSource, coords: Option<usize>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    source,
                    coords,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl RouteProvider for FakeProvider {
        fn source(&self) -> RouteSource {
            self.source
        }

        async fn route(&self, o: GeoPoint, _d: GeoPoint) -> Result<Route, DirectionsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.coords {
                Some(n) => Ok(Route::from_provider(
                    self.source,
                    vec![o; n],
                    1200.0,
                    240.0,
                )),
                None => Err(DirectionsError::NoRoutes),
            }
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(-3.676, -79.002)
    }

    fn destination() -> GeoPoint {
        GeoPoint::new(-3.680, -79.010)
    }

    #[tokio::test]
    async fn test_primary_accepted_without_fallback() {
        let (primary, _) = FakeProvider::new(RouteSource::Google, Some(6));
        let (fallback, fallback_calls) = FakeProvider::new(RouteSource::Osrm, Some(6));
        let service = DirectionsService::new(primary, fallback);

        let route = service.get_route(origin(), destination()).await.unwrap();
        assert_eq!(route.provider, RouteSource::Google);
        assert_eq!(route.distance_km, 1.2);
        assert_eq!(route.duration_min, 4);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_point_primary_uses_fallback() {
        let (primary, _) = FakeProvider::new(RouteSource::Google, Some(2));
        let (fallback, fallback_calls) = FakeProvider::new(RouteSource::Osrm, Some(8));
        let service = DirectionsService::new(primary, fallback);

        let route = service.get_route(origin(), destination()).await.unwrap();
        assert_eq!(route.provider, RouteSource::Osrm);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_route_provider_error() {
        let (primary, _) = FakeProvider::new(RouteSource::Google, None);
        let (fallback, _) = FakeProvider::new(RouteSource::Osrm, None);
        let service = DirectionsService::new(primary, fallback);

        let err = service.get_route(origin(), destination()).await.unwrap_err();
        assert!(matches!(err, AppError::RouteProvider(_)));

        let approx = service
            .route_or_estimate(origin(), destination())
            .await
            .unwrap();
        assert_eq!(approx.quality, RouteQuality::Approximate);
        assert_eq!(approx.coords, vec![origin(), destination()]);
        assert!(approx.distance_km > 0.9 && approx.distance_km < 1.0);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_providers() {
        let (primary, primary_calls) = FakeProvider::new(RouteSource::Google, Some(6));
        let (fallback, _) = FakeProvider::new(RouteSource::Osrm, Some(6));
        let service = DirectionsService::new(primary, fallback);

        let err = service
            .route_or_estimate(GeoPoint::new(f64::NAN, 0.0), destination())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_google_rejects_non_ok_status() {
        let body: GoogleDirectionsResponse = serde_json::from_str(
            r#"{"status":"REQUEST_DENIED","error_message":"bad key","routes":[]}"#,
        )
        .unwrap();
        match parse_google_response(body) {
            Err(DirectionsError::Provider { status, message }) => {
                assert_eq!(status, "REQUEST_DENIED");
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_google_rejects_empty_routes() {
        let body: GoogleDirectionsResponse =
            serde_json::from_str(r#"{"status":"OK","routes":[]}"#).unwrap();
        assert!(matches!(
            parse_google_response(body),
            Err(DirectionsError::NoRoutes)
        ));
    }

    #[test]
    fn test_parse_google_rejects_three_point_polyline() {
        let body: GoogleDirectionsResponse = serde_json::from_str(
            r#"{"status":"OK","routes":[{"legs":[{"distance":{"value":1000},"duration":{"value":60}}],
                "overview_polyline":{"points":"_p~iF~ps|U_ulLnnqC_mqNvxq`@"}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            parse_google_response(body),
            Err(DirectionsError::TooFewCoordinates(3))
        ));
    }

    #[test]
    fn test_parse_osrm_geojson_geometry() {
        let body: OsrmRouteResponse = serde_json::from_str(
            r#"{"code":"Ok","routes":[{"distance":1534.2,"duration":301.0,
                "geometry":{"type":"LineString","coordinates":
                [[-79.002,-3.676],[-79.004,-3.677],[-79.007,-3.679],[-79.010,-3.680]]}}]}"#,
        )
        .unwrap();
        let route = parse_osrm_response(body).unwrap();
        assert_eq!(route.provider, RouteSource::Osrm);
        assert_eq!(route.coords.len(), 4);
        assert_eq!(route.coords[0], GeoPoint::new(-3.676, -79.002));
        assert!((route.distance_km - 1.5342).abs() < 1e-9);
        assert_eq!(route.duration_min, 5);
    }

    #[test]
    fn test_parse_osrm_rejects_error_code() {
        let body: OsrmRouteResponse =
            serde_json::from_str(r#"{"code":"NoRoute","routes":[]}"#).unwrap();
        assert!(matches!(
            parse_osrm_response(body),
            Err(DirectionsError::Provider { .. })
        ));
    }
}
