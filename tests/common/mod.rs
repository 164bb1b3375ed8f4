// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use ride_sync::config::Config;
use ride_sync::db::MemoryStore;
use ride_sync::models::{GeoPoint, Role, UserProfile};
use ride_sync::routes::create_router;
use ride_sync::services::{PickupEtaPolicy, RideController};
use ride_sync::services::fare::FareConfig;
use ride_sync::AppState;
use std::sync::Arc;

pub const ORIGIN: GeoPoint = GeoPoint::new(-3.676, -79.002);
pub const DESTINATION: GeoPoint = GeoPoint::new(-3.680, -79.010);

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Memory store with two drivers, a secretary and two passengers.
#[allow(dead_code)]
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    for (uid, role, name) in [
        ("d1", Role::DriverAdmin, "Ana"),
        ("d2", Role::DriverAdmin, "Luis"),
        ("sec", Role::Secretary, "Central"),
        ("p1", Role::Passenger, "Marta"),
        ("p2", Role::Passenger, "Jorge"),
    ] {
        let mut profile = UserProfile::new(uid, role);
        profile.name = Some(name.to_string());
        store.insert_user(profile).expect("seed user");
    }
    store
}

#[allow(dead_code)]
pub fn test_controller(store: MemoryStore) -> RideController<MemoryStore> {
    RideController::new(store, FareConfig::default(), PickupEtaPolicy::default())
}

/// Serve `router` on an ephemeral local port and return its base URL.
#[allow(dead_code)]
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{}", addr)
}

/// `n` points spread along the test trip.
#[allow(dead_code)]
pub fn route_points(n: usize) -> Vec<GeoPoint> {
    let steps = (n.max(2) - 1) as f64;
    (0..n)
        .map(|i| {
            let t = i as f64 / steps;
            GeoPoint::new(
                ORIGIN.lat + (DESTINATION.lat - ORIGIN.lat) * t,
                ORIGIN.lng + (DESTINATION.lng - ORIGIN.lng) * t,
            )
        })
        .collect()
}

/// A Google Directions `OK` payload whose polyline encodes `points`.
#[allow(dead_code)]
pub fn google_ok_body(points: &[GeoPoint], meters: f64, seconds: f64) -> serde_json::Value {
    let encoded = polyline::encode_coordinates(
        points.iter().map(|p| geo::Coord { x: p.lng, y: p.lat }),
        5,
    )
    .expect("encode polyline");

    serde_json::json!({
        "status": "OK",
        "routes": [{
            "legs": [{"distance": {"value": meters}, "duration": {"value": seconds}}],
            "overview_polyline": {"points": encoded}
        }]
    })
}

/// An OSRM `Ok` payload with GeoJSON geometry.
#[allow(dead_code)]
pub fn osrm_ok_body(points: &[GeoPoint], meters: f64, seconds: f64) -> serde_json::Value {
    let coordinates: Vec<[f64; 2]> = points.iter().map(|p| [p.lng, p.lat]).collect();
    serde_json::json!({
        "code": "Ok",
        "routes": [{
            "distance": meters,
            "duration": seconds,
            "geometry": {"type": "LineString", "coordinates": coordinates}
        }]
    })
}

/// Create a test app for the directions proxy.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app(config: Config) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config).expect("app state"));
    (create_router(state.clone()), state)
}
