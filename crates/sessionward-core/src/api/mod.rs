//! REST API plumbing for the session endpoints.
//!
//! Requests flow `ApiClient` -> `RequestDispatcher` -> `Transport`. The
//! dispatcher attaches the bearer credential and, on an ordinary 401, asks
//! the `RefreshCoordinator` for a new one before retrying once.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod refresh;
pub mod transport;

pub use client::ApiClient;
pub use dispatcher::RequestDispatcher;
pub use error::{ApiError, NETWORK_ERROR_MESSAGE};
pub use models::{LogoutOutcome, TokenResponse, UserProfile};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshPhase};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
