// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride lifecycle tests against the in-memory store.

use axum::{routing::get, Json, Router};
use ride_sync::db::{RideFilter, RideStore};
use ride_sync::error::AppError;
use ride_sync::models::{Role, RideStatus, RouteQuality, RouteSource, UserProfile};
use ride_sync::services::directions::{http_client, GoogleDirectionsClient, OsrmClient};
use ride_sync::services::{DirectionsService, RatingInput};
use std::time::Duration;
use tokio::sync::mpsc;

mod common;
use common::{seeded_store, test_controller, DESTINATION, ORIGIN};

/// Directions service whose primary answers `body` and whose fallback is down.
async fn directions_with_primary(
    body: serde_json::Value,
) -> DirectionsService<GoogleDirectionsClient, OsrmClient> {
    let router = Router::new()
        .route(
            "/api/directions",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        )
        .route(
            "/route/v1/driving/{coords}",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
    let base = common::spawn_server(router).await;
    let http = http_client(Duration::from_secs(5)).unwrap();
    DirectionsService::new(
        GoogleDirectionsClient::new(http.clone(), &format!("{base}/api/directions")),
        OsrmClient::new(http, &base),
    )
}

#[tokio::test]
async fn test_request_ride_prices_from_provider_route() {
    let ctl = test_controller(seeded_store());
    let body = common::google_ok_body(&common::route_points(6), 1200.0, 240.0);
    let directions = directions_with_primary(body).await;

    let ride = ctl
        .request_ride(&directions, "p1", ORIGIN, DESTINATION)
        .await
        .unwrap();

    let route = ride.route.as_ref().unwrap();
    assert_eq!(route.coords.len(), 6);
    assert_eq!(route.provider, RouteSource::Google);
    assert_eq!(route.quality, RouteQuality::Exact);
    assert_eq!(ride.distance_km, Some(1.2));
    assert_eq!(ride.eta_min, Some(4));
    // 0.8 + 1.2 * 0.39 = 1.268
    assert_eq!(ride.price, Some(1.27));
    assert_eq!(ride.status, RideStatus::Open);
    assert_eq!(ride.passenger_name.as_deref(), Some("Marta"));
}

#[tokio::test]
async fn test_request_ride_survives_provider_outage() {
    let ctl = test_controller(seeded_store());
    let body = serde_json::json!({"status": "REQUEST_DENIED", "routes": []});
    let directions = directions_with_primary(body).await;

    let ride = ctl
        .request_ride(&directions, "p1", ORIGIN, DESTINATION)
        .await
        .unwrap();

    let route = ride.route.as_ref().unwrap();
    assert_eq!(route.quality, RouteQuality::Approximate);
    assert_eq!(route.provider, RouteSource::StraightLine);
    assert_eq!(route.coords.len(), 2);
    assert_eq!(ride.price, Some(1.25));
}

#[tokio::test]
async fn test_second_request_while_active_is_rejected() {
    let ctl = test_controller(seeded_store());
    let body = common::google_ok_body(&common::route_points(6), 1200.0, 240.0);
    let directions = directions_with_primary(body).await;

    ctl.request_ride(&directions, "p1", ORIGIN, DESTINATION)
        .await
        .unwrap();
    let err = ctl
        .request_ride(&directions, "p1", ORIGIN, DESTINATION)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActiveRideExists));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_leave_one_active_ride() {
    let ctl = test_controller(seeded_store());

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.create_ride("p2", ORIGIN, DESTINATION, None).await })
        })
        .collect();

    let mut created = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::ActiveRideExists) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let store = seeded_store();
    let drivers: Vec<String> = (0..10).map(|i| format!("driver-{i}")).collect();
    for uid in &drivers {
        store
            .insert_user(UserProfile::new(uid.as_str(), Role::DriverAdmin))
            .unwrap();
    }
    let ctl = test_controller(store);
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();

    let claims: Vec<_> = drivers
        .iter()
        .cloned()
        .map(|uid| {
            let ctl = ctl.clone();
            let ride_id = ride.id.clone();
            tokio::spawn(async move { (uid.clone(), ctl.claim_ride(&ride_id, &uid).await) })
        })
        .collect();

    let mut winners = Vec::new();
    for claim in claims {
        let (uid, result) = claim.await.unwrap();
        match result {
            Ok(_) => winners.push(uid),
            Err(e) => assert!(matches!(e, AppError::AlreadyClaimed), "got {e:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = ctl.get_ride(&ride.id).await.unwrap();
    assert_eq!(stored.driver_id.as_deref(), Some(winners[0].as_str()));
    assert_eq!(stored.status, RideStatus::Assigned);
}

#[tokio::test]
async fn test_mark_finished_requires_assignment() {
    let ctl = test_controller(seeded_store());
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();

    let err = ctl.mark_finished(&ride.id, "d1").await.unwrap_err();
    match err {
        AppError::InvalidTransition { current, attempted } => {
            assert_eq!(current, RideStatus::Open);
            assert_eq!(attempted, RideStatus::Finished);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    ctl.claim_ride(&ride.id, "d1").await.unwrap();
    let ride = ctl.mark_finished(&ride.id, "d1").await.unwrap();
    assert_eq!(ride.status, RideStatus::Finished);
    assert!(ride.finished_at.is_some());
}

#[tokio::test]
async fn test_rating_twice_is_already_rated() {
    let ctl = test_controller(seeded_store());
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();
    ctl.claim_ride(&ride.id, "d1").await.unwrap();
    ctl.mark_finished(&ride.id, "d1").await.unwrap();

    let rated = ctl.submit_rating(&ride.id, "p1", 3u8).await.unwrap();
    assert_eq!(rated.status, RideStatus::Completed);
    let rating = rated.rating.clone().unwrap();
    assert_eq!(rating.score, 3);
    assert_eq!(rating.label, "Excelente");

    let err = ctl
        .submit_rating(&ride.id, "p1", RatingInput::Label("Malo".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyRated));
    assert!(err.is_benign_race());

    let stored = ctl.get_ride(&ride.id).await.unwrap();
    assert_eq!(stored.rating, Some(rating));

    // Completed rides no longer block a new request
    ctl.create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_only_passenger_rates() {
    let ctl = test_controller(seeded_store());
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();
    ctl.claim_ride(&ride.id, "d1").await.unwrap();
    ctl.mark_finished(&ride.id, "d1").await.unwrap();

    let err = ctl.submit_rating(&ride.id, "d1", 1u8).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_finished_unrated_ride_still_blocks() {
    let ctl = test_controller(seeded_store());
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();
    ctl.claim_ride(&ride.id, "d1").await.unwrap();
    ctl.mark_finished(&ride.id, "d1").await.unwrap();

    let err = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActiveRideExists));
}

#[tokio::test]
async fn test_watchers_see_offer_disappear_when_claimed() {
    let ctl = test_controller(seeded_store());
    let ride = ctl
        .create_ride("p1", ORIGIN, DESTINATION, None)
        .await
        .unwrap();

    let (offers_tx, mut offers) = mpsc::unbounded_channel();
    let _offers_sub = ctl.watch_open_rides(move |rides| {
        let _ = offers_tx.send(rides.len());
    });
    let (active_tx, mut active) = mpsc::unbounded_channel();
    let _active_sub = ctl.watch_passenger_active("p1", move |ride| {
        let _ = active_tx.send(ride.map(|r| r.status));
    });

    assert_eq!(offers.recv().await, Some(1));
    assert_eq!(active.recv().await, Some(Some(RideStatus::Open)));

    ctl.claim_ride(&ride.id, "d1").await.unwrap();
    assert_eq!(offers.recv().await, Some(0));
    assert_eq!(active.recv().await, Some(Some(RideStatus::Assigned)));

    let assigned = ctl
        .store()
        .find_rides(&RideFilter::AssignedToDriver("d1".to_string()))
        .await
        .unwrap();
    assert_eq!(assigned.len(), 1);
}
