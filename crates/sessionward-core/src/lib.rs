//! Core library for sessionward - credential storage, single-flight token
//! refresh and the authenticated request pipeline.
//!
//! A front end builds one [`SessionLifecycle`] and sends every business
//! request through its [`ApiClient`]. Subscribers to the session signal learn
//! when the session has ended and the user must sign in again.

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{Durability, SessionLifecycle};
pub use config::Config;
