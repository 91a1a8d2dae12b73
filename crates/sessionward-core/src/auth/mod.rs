//! Session state: where tokens live and who they belong to.
//!
//! This module provides:
//! - `CredentialStore`: token pair storage split across a persistent and an
//!   ephemeral backend
//! - `SessionClaims`: unverified claims decoded from the access token
//! - `SessionSignal`: one-shot notification that the session has ended
//! - `SessionLifecycle`: login, logout and startup hydration

pub mod backend;
pub mod claims;
pub mod lifecycle;
pub mod sealed;
pub mod signal;
pub mod storage;

pub use claims::{AccessDecision, AccessRequirement, Clock, SessionClaims, SystemClock};
pub use lifecycle::SessionLifecycle;
pub use signal::{SessionEnded, SessionSignal};
pub use storage::{CredentialStore, Durability, InitialTokens, TokenPair};
