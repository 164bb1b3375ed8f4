// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models shared with the mobile/web clients.

pub mod live_location;
pub mod message;
pub mod point;
pub mod ride;
pub mod route;
pub mod user;

pub use live_location::LiveLocation;
pub use message::RideMessage;
pub use point::GeoPoint;
pub use ride::{Rating, Ride, RideStatus};
pub use route::{Route, RouteQuality, RouteSource};
pub use user::{Role, UserProfile};
