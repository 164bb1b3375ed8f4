// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - ride logic on top of the store.

pub mod chat;
pub mod directions;
pub mod fare;
pub mod lifecycle;
pub mod live_location;

pub use chat::RideChat;
pub use directions::{DirectionsError, DirectionsService, RouteProvider};
pub use lifecycle::{DriverDetails, PickupEtaPolicy, RatingInput, RideController};
pub use live_location::{LiveLocationPublisher, PositionSource, PublisherConfig};
