//! Identity claims derived from the access credential.
//!
//! Decoding reads the JWT payload without verifying the signature; the server
//! verifies. Any decode failure means "no claims", never an error.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionClaims {
    pub subject: String,
    pub is_admin: bool,
    pub is_superuser: bool,
    pub expires_at_epoch_ms: Option<i64>,
}

impl SessionClaims {
    pub fn role_label(&self) -> &'static str {
        role_label(self.is_admin, self.is_superuser)
    }
}

/// Display name for the highest role held.
pub fn role_label(is_admin: bool, is_superuser: bool) -> &'static str {
    if is_superuser {
        "Super Administrator"
    } else if is_admin {
        "Administrator"
    } else {
        "Normal"
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    username: Option<String>,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    superuser: bool,
    /// Seconds since the epoch; some issuers emit fractions.
    exp: Option<f64>,
}

/// Decode the claims carried by `access_token`.
pub fn decode(access_token: &str) -> Option<SessionClaims> {
    let payload = access_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

    Some(SessionClaims {
        subject: raw.username.or(raw.sub).unwrap_or_default(),
        is_admin: raw.admin,
        is_superuser: raw.superuser,
        expires_at_epoch_ms: raw.exp.map(|exp| (exp * 1000.0) as i64),
    })
}

/// Absent or undecodable credentials are expired; no `exp` never expires.
pub fn is_expired(access_token: Option<&str>, now_ms: i64) -> bool {
    let Some(token) = access_token else {
        return true;
    };
    match decode(token) {
        Some(claims) => claims
            .expires_at_epoch_ms
            .is_some_and(|expires_at| now_ms >= expires_at),
        None => true,
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

// ============================================================================
// Authorization gating
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRequirement {
    Authenticated,
    /// Admins or superusers.
    Admin,
    Superuser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum AccessDecision {
    Granted,
    /// No usable session; send the user to sign in.
    SignInRequired,
    /// Signed in, but lacking the role.
    Forbidden,
}

pub fn authorize(access_token: Option<&str>, now_ms: i64, requirement: AccessRequirement) -> AccessDecision {
    if is_expired(access_token, now_ms) {
        return AccessDecision::SignInRequired;
    }
    let Some(claims) = access_token.and_then(decode) else {
        return AccessDecision::SignInRequired;
    };

    let allowed = match requirement {
        AccessRequirement::Authenticated => true,
        AccessRequirement::Admin => claims.is_admin || claims.is_superuser,
        AccessRequirement::Superuser => claims.is_superuser,
    };
    if allowed {
        AccessDecision::Granted
    } else {
        AccessDecision::Forbidden
    }
}

// ============================================================================
// Tests
// ============================================================================
