//! Ride store layer.
//!
//! The ride core only talks to [`RideStore`]; backends decide how
//! transactions and live snapshots are provided.

#[cfg(feature = "firestore")]
pub mod firestore;
pub mod memory;
pub mod subscription;

#[cfg(feature = "firestore")]
pub use firestore::FirestoreRideStore;
pub use memory::MemoryStore;
pub use subscription::Subscription;

use crate::error::Result;
use crate::models::{GeoPoint, LiveLocation, Ride, RideMessage, RideStatus, UserProfile};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Collection names as constants.
pub mod collections {
    pub const RIDES: &str = "rides";
    pub const LIVE_LOCATIONS: &str = "liveLocations";
    pub const USERS: &str = "users";
    /// One marker per passenger pointing at the ride that blocks a new request
    pub const ACTIVE_RIDES: &str = "activeRides";
    /// Chat, nested under each ride document
    pub const MESSAGES: &str = "messages";
}

/// Most chat messages a ride subscription delivers (oldest first).
pub const RIDE_MESSAGE_LIMIT: usize = 200;

/// Chat order: oldest first, ties broken by id so snapshots are stable.
pub fn sort_messages(messages: &mut [RideMessage]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Which location field of a ride is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedActor {
    Driver,
    Passenger,
}

/// Ride listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RideFilter {
    /// Offers visible to every driver (`open`, `searching`)
    Offered,
    /// Rides a driver is currently running (`assigned`, `in_progress`)
    AssignedToDriver(String),
    /// The passenger's ride that blocks a new request, if any
    ActiveForPassenger(String),
    /// Everything the passenger ever requested
    PassengerHistory(String),
}

impl RideFilter {
    pub fn matches(&self, ride: &Ride) -> bool {
        match self {
            RideFilter::Offered => ride.status.is_claimable(),
            RideFilter::AssignedToDriver(uid) => {
                ride.is_driven_by(uid)
                    && matches!(ride.status, RideStatus::Assigned | RideStatus::InProgress)
            }
            RideFilter::ActiveForPassenger(uid) => {
                ride.passenger_id == *uid && ride.status.blocks_new_request()
            }
            RideFilter::PassengerHistory(uid) => ride.passenger_id == *uid,
        }
    }

    /// Newest first. Only history promises an order; the rest are sorted the
    /// same way so repeated snapshots compare equal.
    pub fn sort(&self, rides: &mut [Ride]) {
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Transactional document store holding rides, live locations and profiles.
///
/// Every method is a suspension point. Implementations must make
/// [`update_ride`](RideStore::update_ride) and
/// [`create_ride`](RideStore::create_ride) atomic with respect to concurrent
/// writers.
pub trait RideStore: Clone + Send + Sync + 'static {
    /// Insert a new ride, assigning its id.
    ///
    /// Fails with `ActiveRideExists` if the passenger already owns a ride in
    /// the claim-blocking set; the check and the insert are one atomic step.
    fn create_ride(&self, ride: Ride) -> impl Future<Output = Result<Ride>> + Send;

    fn get_ride(&self, ride_id: &str) -> impl Future<Output = Result<Option<Ride>>> + Send;

    fn find_rides(&self, filter: &RideFilter) -> impl Future<Output = Result<Vec<Ride>>> + Send;

    /// Transactional read-modify-write of one ride.
    ///
    /// `mutate` sees the current document and may reject it with a domain
    /// error, in which case nothing is written. The closure can run more
    /// than once if the backend retries after contention.
    fn update_ride<F>(&self, ride_id: &str, mutate: F) -> impl Future<Output = Result<Ride>> + Send
    where
        F: FnMut(&mut Ride) -> Result<()> + Send;

    /// Patch the driver or passenger position on a ride.
    ///
    /// Backends enforce their access rules here: `uid` must be the ride's
    /// driver (driver field) or its passenger while the ride is in
    /// `assigned`/`in_progress` (passenger field).
    fn set_ride_location(
        &self,
        ride_id: &str,
        uid: &str,
        actor: TrackedActor,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_live_location(
        &self,
        uid: &str,
    ) -> impl Future<Output = Result<Option<LiveLocation>>> + Send;

    /// Merge-write the actor's live location document.
    fn upsert_live_location(&self, doc: &LiveLocation) -> impl Future<Output = Result<()>> + Send;

    /// Mark the actor as no longer tracking (`isDriving=false`, `rideId=null`).
    fn clear_live_location(
        &self,
        uid: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_user(&self, uid: &str) -> impl Future<Output = Result<Option<UserProfile>>> + Send;

    /// Deliver the ride's current state now and after every change.
    fn subscribe_ride<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<Ride>) + Send + 'static;

    /// Deliver the filtered listing now and whenever it changes.
    fn subscribe_rides<H>(&self, filter: RideFilter, handler: H) -> Subscription
    where
        H: FnMut(Vec<Ride>) + Send + 'static;

    /// Deliver the actor's live location now and after every change.
    fn subscribe_live_location<H>(&self, uid: &str, handler: H) -> Subscription
    where
        H: FnMut(Option<LiveLocation>) + Send + 'static;

    /// Append a chat message to an existing ride, assigning its id.
    fn send_ride_message(
        &self,
        ride_id: &str,
        message: RideMessage,
    ) -> impl Future<Output = Result<RideMessage>> + Send;

    /// Deliver the ride's first [`RIDE_MESSAGE_LIMIT`] messages, oldest
    /// first, now and whenever the chat changes.
    fn subscribe_ride_messages<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Vec<RideMessage>) + Send + 'static;
}
