// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Ride document and its status state machine.

use crate::error::AppError;
use crate::models::{GeoPoint, Route};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Lifecycle status of a ride.
///
/// ```text
/// open/searching --claim--> assigned --(start)--> in_progress
///       |                      |                      |
///       +--cancel--> cancelled +-------finish---------+--> finished --rate--> completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum RideStatus {
    Open,
    Searching,
    Assigned,
    InProgress,
    Finished,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Statuses that prevent the passenger from requesting another ride.
    pub const BLOCKING_NEW_REQUEST: [RideStatus; 5] = [
        RideStatus::Open,
        RideStatus::Searching,
        RideStatus::Assigned,
        RideStatus::InProgress,
        RideStatus::Finished,
    ];

    /// Statuses visible to drivers as available offers.
    pub const OFFERED: [RideStatus; 2] = [RideStatus::Open, RideStatus::Searching];

    pub const fn as_str(self) -> &'static str {
        match self {
            RideStatus::Open => "open",
            RideStatus::Searching => "searching",
            RideStatus::Assigned => "assigned",
            RideStatus::InProgress => "in_progress",
            RideStatus::Finished => "finished",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Claim-blocking set: an unrated finished ride still counts.
    pub fn blocks_new_request(self) -> bool {
        Self::BLOCKING_NEW_REQUEST.contains(&self)
    }

    /// Driver position may be published onto the ride.
    pub fn accepts_driver_location(self) -> bool {
        matches!(
            self,
            RideStatus::Assigned | RideStatus::InProgress | RideStatus::Finished
        )
    }

    /// Passenger position may be published onto the ride.
    pub fn accepts_passenger_location(self) -> bool {
        matches!(self, RideStatus::Assigned | RideStatus::InProgress)
    }

    pub fn is_claimable(self) -> bool {
        Self::OFFERED.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Cancelled | RideStatus::Completed)
    }

    /// Edges of the lifecycle graph. Nothing leaves a terminal status.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Open, Searching)
                | (Open, Assigned)
                | (Open, Cancelled)
                | (Searching, Assigned)
                | (Searching, Cancelled)
                | (Assigned, InProgress)
                | (Assigned, Finished)
                | (InProgress, Finished)
                | (Finished, Completed)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passenger feedback, written once after the ride finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Rating {
    /// 1 (bad) to 3 (excellent)
    pub score: u8,
    pub label: String,
    /// Passenger uid
    pub by: String,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub const MIN_SCORE: u8 = 1;
    pub const MAX_SCORE: u8 = 3;

    /// Display label for a score, as shown in the apps.
    pub fn label_for(score: u8) -> &'static str {
        match score {
            1 => "Malo",
            2 => "Regular",
            _ => "Excelente",
        }
    }
}

/// Ride document stored at `rides/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Ride {
    /// Store-assigned id (also the document id)
    #[serde(default)]
    pub id: String,
    pub passenger_id: String,
    #[serde(default)]
    pub passenger_name: Option<String>,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub driver_plate: Option<String>,

    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub status: RideStatus,
    /// Route snapshot taken at request time
    #[serde(default)]
    pub route: Option<Route>,

    // ─── Live positions ──────────────────────────────────────────
    #[serde(default)]
    pub driver_location: Option<GeoPoint>,
    #[serde(default)]
    pub driver_location_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passenger_location: Option<GeoPoint>,
    #[serde(default)]
    pub passenger_location_updated_at: Option<DateTime<Utc>>,

    // ─── Derived at creation/assignment ──────────────────────────
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub eta_min: Option<u32>,
    #[serde(default)]
    pub pickup_eta_min: Option<u32>,

    #[serde(default)]
    pub rating: Option<Rating>,

    // ─── Transition timestamps ───────────────────────────────────
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ride {
    /// A fresh `open` ride. The id is filled in by the store.
    pub fn new_open(
        passenger_id: impl Into<String>,
        origin: GeoPoint,
        destination: GeoPoint,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            passenger_id: passenger_id.into(),
            passenger_name: None,
            driver_id: None,
            driver_name: None,
            driver_plate: None,
            origin,
            destination,
            status: RideStatus::Open,
            route: None,
            driver_location: None,
            driver_location_updated_at: None,
            passenger_location: None,
            passenger_location_updated_at: None,
            price: None,
            distance_km: None,
            eta_min: None,
            pickup_eta_min: None,
            rating: None,
            created_at,
            accepted_at: None,
            started_at: None,
            finished_at: None,
            cancelled_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, stamping the timestamp that transition owns.
    ///
    /// Timestamps are only written when still unset.
    pub fn transition(&mut self, next: RideStatus, at: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                current: self.status,
                attempted: next,
            });
        }

        let stamp = match next {
            RideStatus::Assigned => &mut self.accepted_at,
            RideStatus::InProgress => &mut self.started_at,
            RideStatus::Finished => &mut self.finished_at,
            RideStatus::Cancelled => &mut self.cancelled_at,
            RideStatus::Completed => &mut self.completed_at,
            RideStatus::Open | RideStatus::Searching => {
                self.status = next;
                return Ok(());
            }
        };
        stamp.get_or_insert(at);
        self.status = next;
        Ok(())
    }

    /// True if `uid` is the assigned driver.
    pub fn is_driven_by(&self, uid: &str) -> bool {
        self.driver_id.as_deref() == Some(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride() -> Ride {
        Ride::new_open(
            "p1",
            GeoPoint::new(-3.676, -79.002),
            GeoPoint::new(-3.680, -79.010),
            Utc::now(),
        )
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        let all = [
            RideStatus::Open,
            RideStatus::Searching,
            RideStatus::Assigned,
            RideStatus::InProgress,
            RideStatus::Finished,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ];
        for next in all {
            assert!(!RideStatus::Cancelled.can_transition_to(next));
            assert!(!RideStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_finished_only_moves_to_completed() {
        assert!(RideStatus::Finished.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Finished.can_transition_to(RideStatus::Cancelled));
        assert!(!RideStatus::Finished.can_transition_to(RideStatus::Assigned));
    }

    #[test]
    fn test_transition_sets_timestamp_once() {
        let mut r = ride();
        let t1 = Utc::now();
        r.transition(RideStatus::Assigned, t1).unwrap();
        assert_eq!(r.accepted_at, Some(t1));

        let t2 = t1 + chrono::Duration::seconds(30);
        r.transition(RideStatus::Finished, t2).unwrap();
        assert_eq!(r.finished_at, Some(t2));
        assert_eq!(r.accepted_at, Some(t1));
    }

    #[test]
    fn test_illegal_transition_reports_current_status() {
        let mut r = ride();
        let err = r.transition(RideStatus::Finished, Utc::now()).unwrap_err();
        match err {
            AppError::InvalidTransition { current, attempted } => {
                assert_eq!(current, RideStatus::Open);
                assert_eq!(attempted, RideStatus::Finished);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(r.status, RideStatus::Open);
        assert!(r.finished_at.is_none());
    }

    #[test]
    fn test_status_sets() {
        assert!(RideStatus::Finished.blocks_new_request());
        assert!(!RideStatus::Completed.blocks_new_request());
        assert!(!RideStatus::Cancelled.blocks_new_request());

        assert!(RideStatus::Finished.accepts_driver_location());
        assert!(!RideStatus::Open.accepts_driver_location());
        assert!(!RideStatus::Finished.accepts_passenger_location());
        assert!(RideStatus::InProgress.accepts_passenger_location());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&RideStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: RideStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, RideStatus::Cancelled);
    }

    #[test]
    fn test_ride_uses_camel_case_fields() {
        let value = serde_json::to_value(ride()).unwrap();
        assert!(value.get("passengerId").is_some());
        assert!(value.get("driverLocationUpdatedAt").is_some());
        assert_eq!(value["status"], "open");
    }
}
