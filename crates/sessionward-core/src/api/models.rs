//! Wire types for the auth endpoints.

use serde::{Deserialize, Serialize};

use crate::auth::claims;

/// `POST /auth/token` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Result of a logical logout, as reported by the server or synthesized
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct LogoutOutcome {
    #[serde(default = "LogoutOutcome::default_code")]
    pub code: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl LogoutOutcome {
    pub const LOGGED_OUT: &'static str = "LOGGED_OUT";
    pub const ALREADY_LOGGED_OUT: &'static str = "ALREADY_LOGGED_OUT";

    fn default_code() -> String {
        Self::LOGGED_OUT.to_string()
    }

    pub fn logged_out() -> Self {
        Self {
            code: Self::LOGGED_OUT.to_string(),
            detail: None,
        }
    }

    pub fn already_logged_out() -> Self {
        Self {
            code: Self::ALREADY_LOGGED_OUT.to_string(),
            detail: None,
        }
    }
}

/// `GET /auth/me` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub locked: bool,
    pub department: Option<String>,
    pub role: Option<String>,
    pub unit: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Non-empty name parts joined by spaces, or the username.
    pub fn full_name(&self) -> String {
        let parts: Vec<&str> = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            self.username.clone()
        } else {
            parts.join(" ")
        }
    }

    pub fn role_label(&self) -> &'static str {
        claims::role_label(self.admin, self.superuser)
    }

    /// Locked overrides active.
    pub fn status_label(&self) -> &'static str {
        if self.locked {
            "Locked"
        } else if self.active {
            "Active"
        } else {
            "Inactive"
        }
    }
}
