// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride lifecycle controller.
//!
//! Every ride mutation goes through the store's transactional
//! `update_ride`, so precondition checks and writes can't interleave with a
//! concurrent actor. The claim is the one place where that matters in
//! practice: two drivers racing for the same offer get exactly one winner.

use crate::config::Config;
use crate::db::{RideFilter, RideStore, Subscription};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, Rating, Ride, RideStatus, Role, Route, UserProfile};
use crate::services::directions::{DirectionsService, RouteProvider};
use crate::services::fare::{distance_km, estimate_duration_min, fare_by_distance, FareConfig};
use chrono::Utc;
use serde::Deserialize;
use validator::Validate;

/// Heuristic time-to-pickup: `max(min_minutes, round(eta_min * factor))`.
///
/// A placeholder, not a routing estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickupEtaPolicy {
    pub factor: f64,
    pub min_minutes: u32,
}

impl Default for PickupEtaPolicy {
    fn default() -> Self {
        Self {
            factor: 0.3,
            min_minutes: 3,
        }
    }
}

impl PickupEtaPolicy {
    /// `None` when the trip ETA is unknown.
    pub fn estimate(&self, eta_min: Option<u32>) -> Option<u32> {
        let eta = eta_min?;
        let scaled = (eta as f64 * self.factor).round();
        let scaled = if scaled.is_finite() && scaled > 0.0 {
            scaled as u32
        } else {
            0
        };
        Some(scaled.max(self.min_minutes))
    }
}

/// Driver identity written when a ride is taken.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DriverDetails {
    /// Driver taking the ride; defaults to the acting user. Secretaries set
    /// this when assigning on a driver's behalf.
    #[serde(default)]
    pub driver_id: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub driver_name: String,
    #[validate(length(min = 1, max = 16))]
    pub driver_plate: String,
    /// Where the driver is right now. Falls back to their live location.
    #[serde(default)]
    #[validate(nested)]
    pub driver_location: Option<GeoPoint>,
}

/// A rating as entered: either the numeric score or its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingInput {
    Score(u8),
    Label(String),
}

impl From<u8> for RatingInput {
    fn from(score: u8) -> Self {
        RatingInput::Score(score)
    }
}

impl RatingInput {
    fn score(&self) -> Result<u8> {
        let score = match self {
            RatingInput::Score(s) => *s,
            RatingInput::Label(label) => (Rating::MIN_SCORE..=Rating::MAX_SCORE)
                .find(|s| Rating::label_for(*s).eq_ignore_ascii_case(label.trim()))
                .ok_or_else(|| AppError::InvalidInput(format!("unknown rating label {label:?}")))?,
        };
        if !(Rating::MIN_SCORE..=Rating::MAX_SCORE).contains(&score) {
            return Err(AppError::InvalidInput(format!(
                "rating score must be between {} and {} (got {score})",
                Rating::MIN_SCORE,
                Rating::MAX_SCORE
            )));
        }
        Ok(score)
    }
}

/// Log and build a `PermissionDenied`.
fn denied(uid: &str, action: &str) -> AppError {
    tracing::error!(uid, action, "Permission denied for ride operation");
    AppError::PermissionDenied(format!("{uid} may not {action}"))
}

/// Drives rides through their lifecycle against a [`RideStore`].
#[derive(Clone)]
pub struct RideController<S> {
    store: S,
    fare: FareConfig,
    pickup_eta: PickupEtaPolicy,
}

impl<S: RideStore> RideController<S> {
    pub fn new(store: S, fare: FareConfig, pickup_eta: PickupEtaPolicy) -> Self {
        Self {
            store,
            fare,
            pickup_eta,
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store, config.fare, config.pickup_eta)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Profile of an actor that must hold an operator role.
    async fn require_operator(&self, uid: &str, action: &str) -> Result<UserProfile> {
        match self.store.get_user(uid).await? {
            Some(profile) if profile.role.is_admin_role() => Ok(profile),
            _ => Err(denied(uid, action)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    /// Create an `open` ride with price, distance and ETA derived from the
    /// route snapshot (or a straight-line estimate when there is none).
    pub async fn create_ride(
        &self,
        passenger_id: &str,
        origin: GeoPoint,
        destination: GeoPoint,
        route: Option<Route>,
    ) -> Result<Ride> {
        if passenger_id.trim().is_empty() {
            return Err(AppError::InvalidInput("passengerId is required".to_string()));
        }
        let origin = origin.checked()?;
        let destination = destination.checked()?;

        let now = Utc::now();
        let mut ride = Ride::new_open(passenger_id, origin, destination, now);
        if let Some(profile) = self.store.get_user(passenger_id).await? {
            ride.passenger_name = profile.name;
        }

        let (km, minutes) = match &route {
            Some(r) => (r.distance_km, r.duration_min),
            None => {
                let km = distance_km(origin, destination);
                (km, estimate_duration_min(km))
            }
        };
        ride.distance_km = Some(km);
        ride.eta_min = Some(minutes);
        ride.price = Some(fare_by_distance(km, &self.fare));
        ride.route = route;

        let ride = self.store.create_ride(ride).await.inspect_err(|e| {
            if matches!(e, AppError::ActiveRideExists) {
                tracing::info!(uid = passenger_id, "Passenger already has an active ride");
            }
        })?;

        tracing::info!(
            ride_id = %ride.id,
            uid = passenger_id,
            price = ?ride.price,
            distance_km = km,
            "Ride created"
        );
        Ok(ride)
    }

    /// Route the trip, price it, and create the ride.
    ///
    /// Provider outages degrade to an approximate straight-line route, so a
    /// ride can always be requested.
    pub async fn request_ride<P, F>(
        &self,
        directions: &DirectionsService<P, F>,
        passenger_id: &str,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Ride>
    where
        P: RouteProvider,
        F: RouteProvider,
    {
        // Cheap early exit before spending a provider call; create_ride
        // repeats the check atomically.
        if self.active_ride_for_passenger(passenger_id).await?.is_some() {
            return Err(AppError::ActiveRideExists);
        }

        let route = directions.route_or_estimate(origin, destination).await?;
        if route.is_approximate() {
            tracing::warn!(uid = passenger_id, "Ride priced from approximate route");
        }
        self.create_ride(passenger_id, origin, destination, Some(route))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Driver side
    // ─────────────────────────────────────────────────────────────────────

    /// Take an offered ride. Exactly one of several concurrent claims wins;
    /// the rest fail with `AlreadyClaimed`.
    pub async fn claim_ride(&self, ride_id: &str, driver_id: &str) -> Result<Ride> {
        let profile = self.require_operator(driver_id, "claim rides").await?;

        let result = self
            .store
            .update_ride(ride_id, |ride| {
                if !ride.status.is_claimable() {
                    return Err(AppError::AlreadyClaimed);
                }
                ride.driver_id = Some(driver_id.to_string());
                if ride.driver_name.is_none() {
                    ride.driver_name = profile.name.clone();
                }
                ride.transition(RideStatus::Assigned, Utc::now())
            })
            .await;

        match &result {
            Ok(_) => tracing::info!(ride_id, uid = driver_id, "Ride claimed"),
            Err(AppError::AlreadyClaimed) => {
                tracing::info!(ride_id, uid = driver_id, "Claim lost the race")
            }
            Err(e) => tracing::warn!(ride_id, uid = driver_id, error = %e, "Claim failed"),
        }
        result
    }

    /// Record driver identity and pickup estimate, claiming the ride first
    /// if it is still on offer. Runs as one transaction.
    pub async fn assign_driver_details(
        &self,
        ride_id: &str,
        actor_id: &str,
        details: DriverDetails,
    ) -> Result<Ride> {
        details
            .validate()
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        let actor = self.require_operator(actor_id, "assign drivers").await?;

        let driver_id = details
            .driver_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| actor.uid.clone());

        let driver_location = match details.driver_location {
            Some(point) => Some(point.checked()?),
            None => self
                .store
                .get_live_location(&driver_id)
                .await?
                .and_then(|live| live.position()),
        };

        let policy = self.pickup_eta;
        let ride = self
            .store
            .update_ride(ride_id, |ride| {
                let now = Utc::now();
                if ride.status.is_claimable() {
                    ride.driver_id = Some(driver_id.clone());
                    ride.transition(RideStatus::Assigned, now)?;
                } else if matches!(ride.status, RideStatus::Assigned | RideStatus::InProgress) {
                    if !ride.is_driven_by(&driver_id) {
                        return Err(AppError::AlreadyClaimed);
                    }
                } else {
                    return Err(AppError::InvalidTransition {
                        current: ride.status,
                        attempted: RideStatus::Assigned,
                    });
                }

                ride.driver_name = Some(details.driver_name.trim().to_string());
                ride.driver_plate = Some(details.driver_plate.trim().to_uppercase());
                if let Some(point) = driver_location {
                    ride.driver_location = Some(point);
                    ride.driver_location_updated_at = Some(now);
                }
                ride.pickup_eta_min = policy.estimate(ride.eta_min);
                Ok(())
            })
            .await?;

        tracing::info!(
            ride_id,
            uid = actor_id,
            driver = %driver_id,
            pickup_eta_min = ?ride.pickup_eta_min,
            "Driver details assigned"
        );
        Ok(ride)
    }

    /// Optional `assigned → in_progress` step.
    pub async fn start_trip(&self, ride_id: &str, actor_id: &str) -> Result<Ride> {
        self.advance(ride_id, actor_id, RideStatus::InProgress, "start trips")
            .await
    }

    /// `assigned | in_progress → finished`.
    pub async fn mark_finished(&self, ride_id: &str, actor_id: &str) -> Result<Ride> {
        self.advance(ride_id, actor_id, RideStatus::Finished, "finish trips")
            .await
    }

    /// Operator-driven status advance. Drivers may only touch their own
    /// rides; admins and secretaries act on anyone's behalf.
    async fn advance(
        &self,
        ride_id: &str,
        actor_id: &str,
        next: RideStatus,
        action: &str,
    ) -> Result<Ride> {
        let profile = self.require_operator(actor_id, action).await?;
        let acts_for_others = profile.role != Role::DriverAdmin;

        let ride = self
            .store
            .update_ride(ride_id, |ride| {
                if !acts_for_others && ride.driver_id.is_some() && !ride.is_driven_by(actor_id) {
                    return Err(denied(actor_id, action));
                }
                ride.transition(next, Utc::now())
            })
            .await
            .inspect_err(|e| {
                if let AppError::InvalidTransition { current, .. } = e {
                    tracing::info!(ride_id, %current, attempted = %next, "Rejected transition");
                }
            })?;

        tracing::info!(ride_id, uid = actor_id, status = %ride.status, "Ride advanced");
        Ok(ride)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Passenger side
    // ─────────────────────────────────────────────────────────────────────

    /// Cancel a ride that has not been taken yet.
    pub async fn cancel_ride(&self, ride_id: &str, actor_id: &str) -> Result<Ride> {
        let is_operator = self
            .store
            .get_user(actor_id)
            .await?
            .is_some_and(|p| p.role.is_admin_role());

        let ride = self
            .store
            .update_ride(ride_id, |ride| {
                if ride.passenger_id != actor_id && !is_operator {
                    return Err(denied(actor_id, "cancel this ride"));
                }
                ride.transition(RideStatus::Cancelled, Utc::now())
            })
            .await?;

        tracing::info!(ride_id, uid = actor_id, "Ride cancelled");
        Ok(ride)
    }

    /// Rate a finished ride, completing it. A second rating fails with
    /// `AlreadyRated` and leaves the first untouched.
    pub async fn submit_rating(
        &self,
        ride_id: &str,
        passenger_id: &str,
        input: impl Into<RatingInput>,
    ) -> Result<Ride> {
        let score = input.into().score()?;

        let ride = self
            .store
            .update_ride(ride_id, |ride| {
                if ride.passenger_id != passenger_id {
                    return Err(denied(passenger_id, "rate this ride"));
                }
                if ride.rating.is_some() {
                    return Err(AppError::AlreadyRated);
                }
                if ride.status != RideStatus::Finished {
                    return Err(AppError::InvalidTransition {
                        current: ride.status,
                        attempted: RideStatus::Completed,
                    });
                }

                let now = Utc::now();
                ride.rating = Some(Rating {
                    score,
                    label: Rating::label_for(score).to_string(),
                    by: passenger_id.to_string(),
                    created_at: now,
                });
                ride.transition(RideStatus::Completed, now)
            })
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::AlreadyRated) {
                    tracing::debug!(ride_id, "Duplicate rating ignored");
                }
            })?;

        tracing::info!(ride_id, uid = passenger_id, score, "Ride rated");
        Ok(ride)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listings and live views
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get_ride(&self, ride_id: &str) -> Result<Ride> {
        self.store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id}")))
    }

    /// Offers every driver can see.
    pub async fn open_rides(&self) -> Result<Vec<Ride>> {
        self.store.find_rides(&RideFilter::Offered).await
    }

    pub async fn rides_for_driver(&self, driver_id: &str) -> Result<Vec<Ride>> {
        self.store
            .find_rides(&RideFilter::AssignedToDriver(driver_id.to_string()))
            .await
    }

    /// The ride currently blocking a new request, if any.
    pub async fn active_ride_for_passenger(&self, passenger_id: &str) -> Result<Option<Ride>> {
        let rides = self
            .store
            .find_rides(&RideFilter::ActiveForPassenger(passenger_id.to_string()))
            .await?;
        Ok(rides.into_iter().next())
    }

    /// Newest first.
    pub async fn history_for_passenger(&self, passenger_id: &str) -> Result<Vec<Ride>> {
        self.store
            .find_rides(&RideFilter::PassengerHistory(passenger_id.to_string()))
            .await
    }

    pub fn watch_ride<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<Ride>) + Send + 'static,
    {
        self.store.subscribe_ride(ride_id, handler)
    }

    pub fn watch_open_rides<H>(&self, handler: H) -> Subscription
    where
        H: FnMut(Vec<Ride>) + Send + 'static,
    {
        self.store.subscribe_rides(RideFilter::Offered, handler)
    }

    pub fn watch_driver_rides<H>(&self, driver_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Vec<Ride>) + Send + 'static,
    {
        self.store
            .subscribe_rides(RideFilter::AssignedToDriver(driver_id.to_string()), handler)
    }

    /// Delivers the passenger's active ride (or `None`) on every change.
    pub fn watch_passenger_active<H>(&self, passenger_id: &str, mut handler: H) -> Subscription
    where
        H: FnMut(Option<Ride>) + Send + 'static,
    {
        self.store.subscribe_rides(
            RideFilter::ActiveForPassenger(passenger_id.to_string()),
            move |rides| handler(rides.into_iter().next()),
        )
    }
}
