// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-ride chat between the passenger and the driver side.

use crate::db::{RideStore, Subscription};
use crate::error::{AppError, Result};
use crate::models::RideMessage;
use chrono::Utc;

/// Sends and watches the messages of a ride.
#[derive(Clone)]
pub struct RideChat<S> {
    store: S,
}

impl<S: RideStore> RideChat<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Post `text` to the ride as `sender_uid`.
    ///
    /// Blank text is dropped and yields `None`. Only the ride's passenger,
    /// its driver, or an operator may post.
    pub async fn send(
        &self,
        ride_id: &str,
        sender_uid: &str,
        text: &str,
    ) -> Result<Option<RideMessage>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let ride = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id}")))?;

        let profile = match self.store.get_user(sender_uid).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(uid = sender_uid, error = %e, "Sender profile unavailable");
                None
            }
        };

        let is_party = ride.passenger_id == sender_uid || ride.is_driven_by(sender_uid);
        let is_operator = profile.as_ref().is_some_and(|p| p.role.is_admin_role());
        if !is_party && !is_operator {
            tracing::error!(uid = sender_uid, ride_id, "Chat message from outsider");
            return Err(AppError::PermissionDenied(format!(
                "{sender_uid} may not message ride {ride_id}"
            )));
        }

        let message = RideMessage {
            id: String::new(),
            text: text.to_string(),
            sender_uid: sender_uid.to_string(),
            sender_name: profile
                .as_ref()
                .and_then(|p| p.name.clone().or_else(|| p.email.clone())),
            sender_role: profile.map(|p| p.role),
            created_at: Utc::now(),
        };
        let message = self.store.send_ride_message(ride_id, message).await?;
        tracing::debug!(ride_id, message_id = %message.id, "Chat message sent");
        Ok(Some(message))
    }

    /// Oldest first, capped at [`crate::db::RIDE_MESSAGE_LIMIT`].
    pub fn watch<H>(&self, ride_id: &str, handler: H) -> Subscription
    where
        H: FnMut(Vec<RideMessage>) + Send + 'static,
    {
        self.store.subscribe_ride_messages(ride_id, handler)
    }
}
