// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed ride store.
//!
//! Collections:
//! - `rides` (ride documents)
//! - `liveLocations` (one document per actor)
//! - `users` (profiles, read only here)
//! - `activeRides` (per-passenger marker guarding the one-active-ride rule)

use super::subscription::Subscription;
use super::{collections, sort_messages, RideFilter, RideStore, TrackedActor, RIDE_MESSAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, LiveLocation, Ride, RideMessage, UserProfile};
use chrono::{DateTime, Utc};
use firestore::FirestoreConsistencySelector;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Commit attempts before a contended transaction gives up.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Snapshot watchers re-read on this cadence.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Points at the passenger's ride that currently blocks a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveRideMarker {
    passenger_id: String,
    ride_id: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreRideStore {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreRideStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Offline client; every operation fails with `Database`.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Seed or replace a user profile (admin tooling and tests).
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&profile.uid)
            .object(profile)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn read_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RIDES)
            .obj()
            .one(ride_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn write_live_location(&self, doc: &LiveLocation) -> Result<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::LIVE_LOCATIONS)
            .document_id(&doc.uid)
            .object(doc)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Candidate rides for a filter. The query narrows by an indexed field;
    /// the exact status set is applied client side.
    async fn query_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::RIDES);

        let query = match filter {
            RideFilter::Offered => query.filter(|q| {
                q.for_any([
                    q.field("status").eq("open"),
                    q.field("status").eq("searching"),
                ])
            }),
            RideFilter::AssignedToDriver(uid) => {
                let uid = uid.clone();
                query.filter(move |q| q.field("driverId").eq(uid.clone()))
            }
            RideFilter::ActiveForPassenger(uid) | RideFilter::PassengerHistory(uid) => {
                let uid = uid.clone();
                query.filter(move |q| q.field("passengerId").eq(uid.clone()))
            }
        };

        let rides: Vec<Ride> = query
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut rides: Vec<Ride> = rides.into_iter().filter(|r| filter.matches(r)).collect();
        filter.sort(&mut rides);
        Ok(rides)
    }

    /// Transactional create guarded by the passenger's active-ride marker.
    async fn create_ride_tx(&self, mut ride: Ride) -> Result<Ride> {
        let client = self.get_client()?;
        ride.id = uuid::Uuid::new_v4().simple().to_string();

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
            let tx_reader = client.clone_with_consistency_selector(
                FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
            );

            // Reading the marker registers it for conflict detection, so two
            // concurrent creates for one passenger can't both commit.
            let marker: Option<ActiveRideMarker> = tx_reader
                .fluent()
                .select()
                .by_id_in(collections::ACTIVE_RIDES)
                .obj()
                .one(&ride.passenger_id)
                .await
                .map_err(|e| AppError::Database(format!("Failed to read marker: {}", e)))?;

            if let Some(marker) = marker {
                let existing: Option<Ride> = tx_reader
                    .fluent()
                    .select()
                    .by_id_in(collections::RIDES)
                    .obj()
                    .one(&marker.ride_id)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                if existing.is_some_and(|r| r.status.blocks_new_request()) {
                    let _ = transaction.rollback().await;
                    return Err(AppError::ActiveRideExists);
                }
            }

            let marker = ActiveRideMarker {
                passenger_id: ride.passenger_id.clone(),
                ride_id: ride.id.clone(),
            };
            client
                .fluent()
                .update()
                .in_col(collections::RIDES)
                .document_id(&ride.id)
                .object(&ride)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add ride to transaction: {}", e))
                })?;
            client
                .fluent()
                .update()
                .in_col(collections::ACTIVE_RIDES)
                .document_id(&ride.passenger_id)
                .object(&marker)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add marker to transaction: {}", e))
                })?;

            match transaction.commit().await {
                Ok(_) => return Ok(ride),
                Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Ride create conflicted, retrying");
                }
                Err(e) => {
                    return Err(AppError::Database(format!(
                        "Transaction commit failed: {}",
                        e
                    )))
                }
            }
        }

        Err(AppError::Database(
            "ride create transaction retries exhausted".to_string(),
        ))
    }

    /// Read-modify-write of one ride inside a transaction, retried on
    /// commit conflicts.
    async fn update_ride_tx<F>(&self, ride_id: &str, mut mutate: F) -> Result<Ride>
    where
        F: FnMut(&mut Ride) -> Result<()> + Send,
    {
        let client = self.get_client()?;

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
            let tx_reader = client.clone_with_consistency_selector(
                FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
            );

            let current: Option<Ride> = tx_reader
                .fluent()
                .select()
                .by_id_in(collections::RIDES)
                .obj()
                .one(ride_id)
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to read ride in transaction: {}", e))
                })?;

            let Some(before) = current else {
                let _ = transaction.rollback().await;
                return Err(AppError::NotFound(format!("ride {ride_id}")));
            };

            let mut ride = before.clone();
            if let Err(e) = mutate(&mut ride) {
                let _ = transaction.rollback().await;
                return Err(e);
            }
            ride.id = ride_id.to_string();

            if ride == before {
                let _ = transaction.rollback().await;
                return Ok(ride);
            }

            client
                .fluent()
                .update()
                .in_col(collections::RIDES)
                .document_id(ride_id)
                .object(&ride)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add ride to transaction: {}", e))
                })?;

            match transaction.commit().await {
                Ok(_) => return Ok(ride),
                Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::warn!(ride_id, attempt, error = %e, "Ride transaction conflicted, retrying");
                }
                Err(e) => {
                    return Err(AppError::Database(format!(
                        "Transaction commit failed: {}",
                        e
                    )))
                }
            }
        }

        Err(AppError::Database(format!(
            "ride {ride_id} transaction retries exhausted"
        )))
    }

    fn ride_parent(&self, ride_id: &str) -> Result<firestore::ParentPathBuilder> {
        self.get_client()?
            .parent_path(collections::RIDES, ride_id)
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_ride_messages(&self, ride_id: &str) -> Result<Vec<RideMessage>> {
        let parent = self.ride_parent(ride_id)?;
        let mut messages: Vec<RideMessage> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::MESSAGES)
            .parent(&parent)
            .order_by([(
                "createdAt",
                firestore::FirestoreQueryDirection::Ascending,
            )])
            .limit(RIDE_MESSAGE_LIMIT as u32)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        // Equal timestamps come back in no particular order
        sort_messages(&mut messages);
        Ok(messages)
    }

    /// Poll `fetch` and deliver changed snapshots.
    ///
    /// Changes show up with up to [`WATCH_POLL_INTERVAL`] of latency, and
    /// every open watcher costs one full query per interval even when
    /// nothing changed. That is a document read per matching ride for
    /// `subscribe_rides`, so keep listing watchers few and short-lived.
    // TODO: switch to firestore listen streams (FirestoreListener) for rides.
    fn poll_snapshots<T, Q, Fut, H>(&self, fetch: Q, mut handler: H) -> Subscription
    where
        T: Clone + PartialEq + Send + 'static,
        Q: Fn(FirestoreRideStore) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
        H: FnMut(T) + Send + 'static,
    {
        let store = self.clone();
        Subscription::spawn(async move {
            let mut last: Option<T> = None;
            loop {
                match fetch(store.clone()).await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            handler(snapshot.clone());
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Snapshot poll failed"),
                }
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;
            }
        })
    }
}

impl RideStore for FirestoreRideStore {
    async fn create_ride(&self, ride: Ride) -> Result<Ride> {
        let ride = self.create_ride_tx(ride).await?;
        tracing::debug!(ride_id = %ride.id, "Ride document created");
        Ok(ride)
    }

    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        self.read_ride(ride_id).await
    }

    async fn find_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        self.query_rides(filter).await
    }

    async fn update_ride<F>(&self, ride_id: &str, mutate: F) -> Result<Ride>
    where
        F: FnMut(&mut Ride) -> Result<()> + Send,
    {
        self.update_ride_tx(ride_id, mutate).await
    }

    async fn set_ride_location(
        &self,
        ride_id: &str,
        uid: &str,
        actor: TrackedActor,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_ride_tx(ride_id, |ride| match actor {
            TrackedActor::Driver => {
                if !ride.is_driven_by(uid) {
                    return Err(AppError::PermissionDenied(format!(
                        "{uid} is not the driver of ride {ride_id}"
                    )));
                }
                ride.driver_location = Some(point);
                ride.driver_location_updated_at = Some(at);
                Ok(())
            }
            TrackedActor::Passenger => {
                if ride.passenger_id != uid || !ride.status.accepts_passenger_location() {
                    return Err(AppError::PermissionDenied(format!(
                        "{uid} may not write the passenger location of ride {ride_id} ({})",
                        ride.status
                    )));
                }
                ride.passenger_location = Some(point);
                ride.passenger_location_updated_at = Some(at);
                Ok(())
            }
        })
        .await?;
        Ok(())
    }

    async fn get_live_location(&self, uid: &str) -> Result<Option<LiveLocation>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::LIVE_LOCATIONS)
            .obj()
            .one(uid)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_live_location(&self, doc: &LiveLocation) -> Result<()> {
        // Only the owning actor writes this document, so a read-merge-write
        // is enough to keep coordinates on metadata-only updates.
        let mut merged = doc.clone();
        if merged.lat.is_none() || merged.lng.is_none() {
            if let Some(existing) = self.get_live_location(&doc.uid).await? {
                merged.lat = existing.lat;
                merged.lng = existing.lng;
            }
        }
        self.write_live_location(&merged).await
    }

    async fn clear_live_location(&self, uid: &str, at: DateTime<Utc>) -> Result<()> {
        let mut doc = self
            .get_live_location(uid)
            .await?
            .unwrap_or_else(|| LiveLocation {
                uid: uid.to_string(),
                ride_id: None,
                lat: None,
                lng: None,
                is_driving: false,
                updated_at: at,
            });
        doc.ride_id = None;
        doc.is_driving = false;
        doc.updated_at = at;
        self.write_live_location(&doc).await
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(uid)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    fn subscribe_ride<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<Ride>) + Send + 'static,
    {
        let ride_id = ride_id.to_string();
        self.poll_snapshots(
            move |store| {
                let ride_id = ride_id.clone();
                async move { store.read_ride(&ride_id).await }
            },
            handler,
        )
    }

    fn subscribe_rides<H>(&self, filter: RideFilter, handler: H) -> Subscription
    where
        H: FnMut(Vec<Ride>) + Send + 'static,
    {
        self.poll_snapshots(
            move |store| {
                let filter = filter.clone();
                async move { store.query_rides(&filter).await }
            },
            handler,
        )
    }

    fn subscribe_live_location<H>(&self, uid: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<LiveLocation>) + Send + 'static,
    {
        let uid = uid.to_string();
        self.poll_snapshots(
            move |store| {
                let uid = uid.clone();
                async move { store.get_live_location(&uid).await }
            },
            handler,
        )
    }

    async fn send_ride_message(&self, ride_id: &str, mut message: RideMessage) -> Result<RideMessage> {
        if self.read_ride(ride_id).await?.is_none() {
            return Err(AppError::NotFound(format!("ride {ride_id}")));
        }
        let parent = self.ride_parent(ride_id)?;
        message.id = uuid::Uuid::new_v4().simple().to_string();
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::MESSAGES)
            .document_id(&message.id)
            .parent(&parent)
            .object(&message)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(message)
    }

    fn subscribe_ride_messages<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Vec<RideMessage>) + Send + 'static,
    {
        let ride_id = ride_id.to_string();
        self.poll_snapshots(
            move |store| {
                let ride_id = ride_id.clone();
                async move { store.list_ride_messages(&ride_id).await }
            },
            handler,
        )
    }
}
