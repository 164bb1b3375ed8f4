// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process ride store.
//!
//! Backs tests and embedded single-node deployments. One mutex guards all
//! collections, which makes every write trivially atomic; change feeds are
//! `watch` channels carrying a version counter per collection.

use super::subscription::Subscription;
use super::{sort_messages, RideFilter, RideStore, TrackedActor, RIDE_MESSAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, LiveLocation, Ride, RideMessage, UserProfile};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug)]
struct Versioned<T> {
    doc: T,
    /// Bumped on every write that changed the document
    revision: u64,
}

impl<T> Versioned<T> {
    fn new(doc: T) -> Self {
        Self { doc, revision: 1 }
    }
}

#[derive(Debug, Default)]
struct Collections {
    rides: HashMap<String, Versioned<Ride>>,
    live_locations: HashMap<String, Versioned<LiveLocation>>,
    users: HashMap<String, UserProfile>,
    /// Chat per ride id, in arrival order
    messages: HashMap<String, Vec<RideMessage>>,
}

#[derive(Debug)]
struct Inner {
    collections: Mutex<Collections>,
    rides_changed: watch::Sender<u64>,
    live_changed: watch::Sender<u64>,
    messages_changed: watch::Sender<u64>,
}

/// Store kept entirely in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (rides_changed, _) = watch::channel(0);
        let (live_changed, _) = watch::channel(0);
        let (messages_changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(Collections::default()),
                rides_changed,
                live_changed,
                messages_changed,
            }),
        }
    }

    /// Seed or replace a user profile.
    pub fn insert_user(&self, profile: UserProfile) -> Result<()> {
        self.lock()?.users.insert(profile.uid.clone(), profile);
        Ok(())
    }

    /// Number of effective writes the ride has seen (1 after creation).
    pub fn ride_revision(&self, ride_id: &str) -> Option<u64> {
        let collections = self.lock().ok()?;
        collections.rides.get(ride_id).map(|v| v.revision)
    }

    /// Number of effective writes the live location document has seen.
    pub fn live_location_revision(&self, uid: &str) -> Option<u64> {
        let collections = self.lock().ok()?;
        collections.live_locations.get(uid).map(|v| v.revision)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.inner
            .collections
            .lock()
            .map_err(|_| AppError::Database("memory store lock poisoned".to_string()))
    }

    fn notify_rides(&self) {
        self.inner.rides_changed.send_modify(|v| *v += 1);
    }

    fn notify_live(&self) {
        self.inner.live_changed.send_modify(|v| *v += 1);
    }

    fn push_message(&self, ride_id: &str, mut message: RideMessage) -> Result<RideMessage> {
        {
            let mut collections = self.lock()?;
            if !collections.rides.contains_key(ride_id) {
                return Err(AppError::NotFound(format!("ride {ride_id}")));
            }
            message.id = uuid::Uuid::new_v4().simple().to_string();
            collections
                .messages
                .entry(ride_id.to_string())
                .or_default()
                .push(message.clone());
        }
        self.inner.messages_changed.send_modify(|v| *v += 1);
        Ok(message)
    }

    fn query_messages(&self, ride_id: &str) -> Result<Vec<RideMessage>> {
        let mut messages = self
            .lock()?
            .messages
            .get(ride_id)
            .cloned()
            .unwrap_or_default();
        sort_messages(&mut messages);
        messages.truncate(RIDE_MESSAGE_LIMIT);
        Ok(messages)
    }

    fn insert_ride(&self, mut ride: Ride) -> Result<Ride> {
        {
            let mut collections = self.lock()?;
            let blocked = collections.rides.values().any(|v| {
                v.doc.passenger_id == ride.passenger_id && v.doc.status.blocks_new_request()
            });
            if blocked {
                return Err(AppError::ActiveRideExists);
            }

            ride.id = uuid::Uuid::new_v4().simple().to_string();
            collections
                .rides
                .insert(ride.id.clone(), Versioned::new(ride.clone()));
        }
        self.notify_rides();
        Ok(ride)
    }

    fn modify_ride<F>(&self, ride_id: &str, mut mutate: F) -> Result<Ride>
    where
        F: FnMut(&mut Ride) -> Result<()>,
    {
        let (updated, changed) = {
            let mut collections = self.lock()?;
            let entry = collections
                .rides
                .get_mut(ride_id)
                .ok_or_else(|| AppError::NotFound(format!("ride {ride_id}")))?;

            let mut draft = entry.doc.clone();
            mutate(&mut draft)?;
            draft.id = ride_id.to_string();

            let changed = draft != entry.doc;
            if changed {
                entry.doc = draft.clone();
                entry.revision += 1;
            }
            (draft, changed)
        };

        if changed {
            self.notify_rides();
        }
        Ok(updated)
    }

    fn patch_ride_location(
        &self,
        ride_id: &str,
        uid: &str,
        actor: TrackedActor,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut collections = self.lock()?;
            let entry = collections
                .rides
                .get_mut(ride_id)
                .ok_or_else(|| AppError::NotFound(format!("ride {ride_id}")))?;
            let ride = &mut entry.doc;

            match actor {
                TrackedActor::Driver => {
                    if !ride.is_driven_by(uid) {
                        return Err(AppError::PermissionDenied(format!(
                            "{uid} is not the driver of ride {ride_id}"
                        )));
                    }
                    ride.driver_location = Some(point);
                    ride.driver_location_updated_at = Some(at);
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
                }
            }
            entry.revision += 1;
        }
        self.notify_rides();
        Ok(())
    }

    fn put_live_location(&self, doc: &LiveLocation) -> Result<()> {
        {
            let mut collections = self.lock()?;
            match collections.live_locations.get_mut(&doc.uid) {
                Some(entry) => {
                    // Merge semantics: a write without coordinates keeps the old ones.
                    let mut merged = doc.clone();
                    if merged.lat.is_none() || merged.lng.is_none() {
                        merged.lat = entry.doc.lat;
                        merged.lng = entry.doc.lng;
                    }
                    entry.doc = merged;
                    entry.revision += 1;
                }
                None => {
                    collections
                        .live_locations
                        .insert(doc.uid.clone(), Versioned::new(doc.clone()));
                }
            }
        }
        self.notify_live();
        Ok(())
    }

    fn reset_live_location(&self, uid: &str, at: DateTime<Utc>) -> Result<()> {
        {
            let mut collections = self.lock()?;
            match collections.live_locations.get_mut(uid) {
                Some(entry) => {
                    entry.doc.ride_id = None;
                    entry.doc.is_driving = false;
                    entry.doc.updated_at = at;
                    entry.revision += 1;
                }
                None => {
                    let doc = LiveLocation {
                        uid: uid.to_string(),
                        ride_id: None,
                        lat: None,
                        lng: None,
                        is_driving: false,
                        updated_at: at,
                    };
                    collections
                        .live_locations
                        .insert(uid.to_string(), Versioned::new(doc));
                }
            }
        }
        self.notify_live();
        Ok(())
    }

    fn query_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        let collections = self.lock()?;
        let mut rides: Vec<Ride> = collections
            .rides
            .values()
            .filter(|v| filter.matches(&v.doc))
            .map(|v| v.doc.clone())
            .collect();
        drop(collections);
        filter.sort(&mut rides);
        Ok(rides)
    }
}

/// Deliver `query()` now and after every change on `changes`, skipping
/// snapshots equal to the last one delivered.
fn watch_snapshots<T, Q, H>(mut changes: watch::Receiver<u64>, query: Q, mut handler: H) -> Subscription
where
    T: Clone + PartialEq + Send + 'static,
    Q: Fn() -> Option<T> + Send + 'static,
    H: FnMut(T) + Send + 'static,
{
    Subscription::spawn(async move {
        let mut last: Option<T> = None;
        loop {
            changes.borrow_and_update();
            if let Some(snapshot) = query() {
                if last.as_ref() != Some(&snapshot) {
                    handler(snapshot.clone());
                    last = Some(snapshot);
                }
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
}

impl RideStore for MemoryStore {
    async fn create_ride(&self, ride: Ride) -> Result<Ride> {
        self.insert_ride(ride)
    }

    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        let collections = self.lock()?;
        Ok(collections.rides.get(ride_id).map(|v| v.doc.clone()))
    }

    async fn find_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        self.query_rides(filter)
    }

    async fn update_ride<F>(&self, ride_id: &str, mutate: F) -> Result<Ride>
    where
        F: FnMut(&mut Ride) -> Result<()> + Send,
    {
        self.modify_ride(ride_id, mutate)
    }

    async fn set_ride_location(
        &self,
        ride_id: &str,
        uid: &str,
        actor: TrackedActor,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.patch_ride_location(ride_id, uid, actor, point, at)
    }

    async fn get_live_location(&self, uid: &str) -> Result<Option<LiveLocation>> {
        let collections = self.lock()?;
        Ok(collections.live_locations.get(uid).map(|v| v.doc.clone()))
    }

    async fn upsert_live_location(&self, doc: &LiveLocation) -> Result<()> {
        self.put_live_location(doc)
    }

    async fn clear_live_location(&self, uid: &str, at: DateTime<Utc>) -> Result<()> {
        self.reset_live_location(uid, at)
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        let collections = self.lock()?;
        Ok(collections.users.get(uid).cloned())
    }

    fn subscribe_ride<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<Ride>) + Send + 'static,
    {
        let store = self.clone();
        let ride_id = ride_id.to_string();
        watch_snapshots(
            self.inner.rides_changed.subscribe(),
            move || {
                let collections = store.lock().ok()?;
                Some(collections.rides.get(&ride_id).map(|v| v.doc.clone()))
            },
            handler,
        )
    }

    fn subscribe_rides<H>(&self, filter: RideFilter, handler: H) -> Subscription
    where
        H: FnMut(Vec<Ride>) + Send + 'static,
    {
        let store = self.clone();
        watch_snapshots(
            self.inner.rides_changed.subscribe(),
            move || store.query_rides(&filter).ok(),
            handler,
        )
    }

    fn subscribe_live_location<H>(&self, uid: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<LiveLocation>) + Send + 'static,
    {
        let store = self.clone();
        let uid = uid.to_string();
        watch_snapshots(
            self.inner.live_changed.subscribe(),
            move || {
                let collections = store.lock().ok()?;
                Some(collections.live_locations.get(&uid).map(|v| v.doc.clone()))
            },
            handler,
        )
    }

    async fn send_ride_message(&self, ride_id: &str, message: RideMessage) -> Result<RideMessage> {
        self.push_message(ride_id, message)
    }

    fn subscribe_ride_messages<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Vec<RideMessage>) + Send + 'static,
    {
        let store = self.clone();
        let ride_id = ride_id.to_string();
        watch_snapshots(
            self.inner.messages_changed.subscribe(),
            move || store.query_messages(&ride_id).ok(),
            handler,
        )
    }
}
