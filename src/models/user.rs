//! User profile model (access-control collaborator).

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Actor role stored on the user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Role {
    Passenger,
    /// Driver accounts; they claim and run rides.
    DriverAdmin,
    Admin,
    /// Dispatcher who assigns rides on a driver's behalf.
    Secretary,
}

impl Role {
    /// Every non-passenger role may operate on rides past `open`.
    pub fn is_admin_role(self) -> bool {
        matches!(self, Role::DriverAdmin | Role::Admin | Role::Secretary)
    }
}

/// User profile stored at `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    /// Display name shown to the other party
    #[serde(default)]
    pub name: Option<String>,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            role,
            name: None,
        }
    }
}
