// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live location publisher.
//!
//! One publisher per logged-in actor. Device samples land in a single-slot
//! coalescing queue; a writer task drains it at most once per
//! `min_write_interval`. A sample that arrives during the wait replaces the
//! pending one, and the pending one is always written once the wait is
//! over, so the newest position is never dropped.
//!
//! ```text
//!  watch_positions ──┐
//!  poll (5s) ────────┼──> [pending slot] ──writer──> liveLocations/{uid}
//!  submit() ─────────┘                        └────> rides/{rideId}.{actor}Location
//! ```

use crate::db::{RideStore, Subscription, TrackedActor};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, LiveLocation, RideStatus};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Throttle and fallback-poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Minimum spacing between accepted writes
    pub min_write_interval: Duration,
    /// Independent position poll, in case watch callbacks stall
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            min_write_interval: Duration::from_millis(1200),
            poll_interval: Duration::from_millis(5000),
        }
    }
}

/// Device position provider.
pub trait PositionSource: Send + Sync + 'static {
    /// Ask for location access. An error halts `start`.
    fn request_permission(&self) -> impl Future<Output = Result<()>> + Send;

    /// One fresh fix.
    fn current_position(&self) -> impl Future<Output = Result<GeoPoint>> + Send;

    /// Continuous position updates until the stream is dropped.
    fn watch_positions(&self) -> BoxStream<'static, GeoPoint>;
}

/// State shared between the publisher handle and its tasks.
#[derive(Debug, Default)]
struct Slot {
    pending: Option<GeoPoint>,
    last_write: Option<Instant>,
    ride_id: Option<String>,
    /// Last known status of `ride_id`, used to gate ride patches
    ride_status: Option<RideStatus>,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    wake: Notify,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        // A panic while holding the slot can't leave it inconsistent; every
        // field is overwritten wholesale.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn offer(&self, point: GeoPoint) {
        if !point.is_finite() {
            tracing::debug!("Dropping non-finite position sample");
            return;
        }
        self.slot().pending = Some(point);
        self.wake.notify_one();
    }

    fn throttle_remaining(&self, min_interval: Duration) -> Duration {
        match self.slot().last_write {
            Some(at) => min_interval.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Per-start tasks. Dropping a session stops sampling.
struct Session {
    watcher: JoinHandle<()>,
    poller: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    ride_watch: Option<Subscription>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.watcher.abort();
        self.poller.abort();
        let _ = self.shutdown.send(true);
    }
}

/// Writer task state.
struct Writer<S> {
    uid: String,
    actor: TrackedActor,
    store: S,
    shared: Arc<Shared>,
    min_interval: Duration,
}

impl<S: RideStore> Writer<S> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let has_pending = self.shared.slot().pending.is_some();
            if !has_pending {
                tokio::select! {
                    _ = self.shared.wake.notified() => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            }

            let wait = self.shared.throttle_remaining(self.min_interval);
            if !wait.is_zero() {
                tracing::debug!(uid = %self.uid, wait_ms = wait.as_millis() as u64, "Throttling live location write");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
            }

            // Whatever is pending now wins, even if it is the same sample
            // that was pending before the wait.
            let Some(point) = self.shared.slot().pending.take() else {
                continue;
            };
            self.publish(point).await;
            self.shared.slot().last_write = Some(Instant::now());
        }
        tracing::debug!(uid = %self.uid, "Live location writer stopped");
    }

    /// Write one accepted sample. Failures are logged and the loop goes on.
    async fn publish(&self, point: GeoPoint) {
        let now = Utc::now();
        let ride_id = self.shared.slot().ride_id.clone();

        let doc = LiveLocation::at_point(
            &self.uid,
            ride_id.clone(),
            point,
            is_driving(self.actor, ride_id.as_deref()),
            now,
        );
        if let Err(e) = self.store.upsert_live_location(&doc).await {
            log_write_failure(&self.uid, "liveLocation", &e);
        }

        let Some(ride_id) = ride_id else {
            return;
        };
        let Some(status) = self.ride_status(&ride_id).await else {
            return;
        };
        let allowed = match self.actor {
            TrackedActor::Driver => status.accepts_driver_location(),
            TrackedActor::Passenger => status.accepts_passenger_location(),
        };
        if !allowed {
            tracing::debug!(uid = %self.uid, ride_id = %ride_id, %status, "Ride not accepting location");
            return;
        }

        if let Err(e) = self
            .store
            .set_ride_location(&ride_id, &self.uid, self.actor, point, now)
            .await
        {
            log_write_failure(&self.uid, "rideLocation", &e);
        }
    }

    /// Cached status of the attached ride, fetched once if the ride
    /// subscription hasn't delivered yet.
    async fn ride_status(&self, ride_id: &str) -> Option<RideStatus> {
        if let Some(status) = self.shared.slot().ride_status {
            return Some(status);
        }

        match self.store.get_ride(ride_id).await {
            Ok(ride) => {
                let status = ride.map(|r| r.status);
                let mut slot = self.shared.slot();
                if slot.ride_id.as_deref() == Some(ride_id) {
                    slot.ride_status = status;
                }
                status
            }
            Err(e) => {
                tracing::warn!(uid = %self.uid, ride_id, error = %e, "Failed to read ride status");
                None
            }
        }
    }
}

/// Only a driver on a ride counts as driving; passengers never do.
fn is_driving(actor: TrackedActor, ride_id: Option<&str>) -> bool {
    actor == TrackedActor::Driver && ride_id.is_some()
}

fn log_write_failure(uid: &str, target: &str, error: &AppError) {
    match error {
        AppError::PermissionDenied(msg) => {
            tracing::error!(uid, target, error = %msg, "Live location write denied")
        }
        other => tracing::warn!(uid, target, error = %other, "Live location write failed"),
    }
}

/// Publishes one actor's device position to the store.
pub struct LiveLocationPublisher<S, P> {
    uid: String,
    actor: TrackedActor,
    store: S,
    source: Arc<P>,
    config: PublisherConfig,
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl<S: RideStore, P: PositionSource> LiveLocationPublisher<S, P> {
    pub fn new(
        uid: impl Into<String>,
        actor: TrackedActor,
        store: S,
        source: P,
        config: PublisherConfig,
    ) -> Self {
        Self {
            uid: uid.into(),
            actor,
            store,
            source: Arc::new(source),
            config,
            shared: Arc::new(Shared::default()),
            session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn active_ride_id(&self) -> Option<String> {
        self.shared.slot().ride_id.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Begin publishing, attached to `ride_id` if given.
    ///
    /// On a running publisher this only re-targets the ride (and resets the
    /// throttle if the ride changed). Permission failure is returned and
    /// nothing is started.
    pub async fn start(&self, ride_id: Option<String>) -> Result<()> {
        let mut session = self.session.lock().await;

        if let Some(running) = session.as_mut() {
            let switched = self.attach_ride(ride_id.clone());
            if switched {
                running.ride_watch = self.watch_ride(ride_id.as_deref());
            }
            tracing::info!(uid = %self.uid, ride_id = ?ride_id, switched, "Live location re-targeted");

            // Metadata only; the merge keeps the last coordinates.
            let meta = LiveLocation {
                uid: self.uid.clone(),
                is_driving: is_driving(self.actor, ride_id.as_deref()),
                ride_id,
                lat: None,
                lng: None,
                updated_at: Utc::now(),
            };
            if let Err(e) = self.store.upsert_live_location(&meta).await {
                log_write_failure(&self.uid, "liveLocation", &e);
            }
            drop(session);
            self.force_fresh_point().await;
            return Ok(());
        }

        self.source.request_permission().await.inspect_err(|e| {
            tracing::warn!(uid = %self.uid, error = %e, "Location permission not granted");
        })?;

        self.attach_ride(ride_id.clone());
        {
            // A cold start always gets its fresh fix out immediately.
            let mut slot = self.shared.slot();
            slot.pending = None;
            slot.last_write = None;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let writer = Writer {
            uid: self.uid.clone(),
            actor: self.actor,
            store: self.store.clone(),
            shared: self.shared.clone(),
            min_interval: self.config.min_write_interval,
        };

        let shared = self.shared.clone();
        let mut positions = self.source.watch_positions();
        let watcher = tokio::spawn(async move {
            while let Some(point) = positions.next().await {
                shared.offer(point);
            }
        });

        let shared = self.shared.clone();
        let source = self.source.clone();
        let period = self.config.poll_interval;
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match source.current_position().await {
                    Ok(point) => shared.offer(point),
                    Err(e) => tracing::debug!(error = %e, "Position poll failed"),
                }
            }
        });

        *session = Some(Session {
            watcher,
            poller,
            writer: Some(tokio::spawn(writer.run(shutdown_rx))),
            shutdown,
            ride_watch: self.watch_ride(ride_id.as_deref()),
        });
        drop(session);

        tracing::info!(uid = %self.uid, actor = ?self.actor, ride_id = ?ride_id, "Live location started");
        self.force_fresh_point().await;
        Ok(())
    }

    /// Stop sampling and mark the actor as no longer tracking.
    ///
    /// A write already in flight finishes first; a pending sample is
    /// discarded.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.watcher.abort();
        session.poller.abort();
        session.ride_watch = None;
        let _ = session.shutdown.send(true);
        if let Some(writer) = session.writer.take() {
            if let Err(e) = writer.await {
                tracing::warn!(uid = %self.uid, error = %e, "Live location writer ended abnormally");
            }
        }
        drop(session);

        {
            let mut slot = self.shared.slot();
            slot.pending = None;
            slot.last_write = None;
            slot.ride_id = None;
            slot.ride_status = None;
        }

        self.store
            .clear_live_location(&self.uid, Utc::now())
            .await
            .inspect_err(|e| log_write_failure(&self.uid, "liveLocation", e))?;
        tracing::info!(uid = %self.uid, "Live location stopped");
        Ok(())
    }

    /// Feed an externally obtained sample. Ignored unless running.
    pub async fn submit(&self, point: GeoPoint) -> bool {
        if !self.is_running().await {
            tracing::debug!(uid = %self.uid, "Sample submitted while stopped");
            return false;
        }
        self.shared.offer(point);
        true
    }

    /// App returned to the foreground: publish a fresh fix right away.
    pub async fn resume(&self) {
        if !self.is_running().await {
            return;
        }
        self.shared.slot().last_write = None;
        self.force_fresh_point().await;
    }

    /// Follow the other party's live location (for the live view).
    pub fn subscribe_counterpart<H>(&self, counterpart_uid: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<LiveLocation>) + Send + 'static,
    {
        self.store.subscribe_live_location(counterpart_uid, handler)
    }

    async fn force_fresh_point(&self) {
        match self.source.current_position().await {
            Ok(point) => self.shared.offer(point),
            Err(e) => tracing::warn!(uid = %self.uid, error = %e, "Could not get a fresh position"),
        }
    }

    /// Point the slot at `ride_id`. Returns true if the ride changed, in
    /// which case the throttle clock is reset.
    fn attach_ride(&self, ride_id: Option<String>) -> bool {
        let mut slot = self.shared.slot();
        let switched = slot.ride_id != ride_id;
        if switched {
            slot.ride_id = ride_id;
            slot.ride_status = None;
            slot.last_write = None;
        }
        switched
    }

    fn watch_ride(&self, ride_id: Option<&str>) -> Option<Subscription> {
        let ride_id = ride_id?.to_string();
        let shared = self.shared.clone();
        let watched = ride_id.clone();
        Some(self.store.subscribe_ride(&ride_id, move |ride| {
            let mut slot = shared.slot();
            if slot.ride_id.as_deref() == Some(watched.as_str()) {
                slot.ride_status = ride.map(|r| r.status);
            }
        }))
    }
}
