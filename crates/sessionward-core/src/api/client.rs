//! API client for the session endpoints and authenticated JSON calls.
//!
//! Every request goes through the [`RequestDispatcher`]. On top of it the
//! client adds the caller-level policy: a bounded number of retries with
//! doubling backoff for 5xx responses. 4xx responses are never retried here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::dispatcher::RequestDispatcher;
use super::models::{LogoutOutcome, TokenResponse, UserProfile};
use super::transport::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::config::Config;

const TOKEN_PATH: &str = "/auth/token";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/auth/me";

/// Clone is cheap - the dispatcher is shared.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Arc<RequestDispatcher>,
    server_error_retries: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(dispatcher: Arc<RequestDispatcher>, config: &Config) -> Self {
        Self {
            dispatcher,
            server_error_retries: config.server_error_retries,
            initial_backoff: config.initial_backoff(),
        }
    }

    /// Send through the dispatcher, retrying 5xx with backoff.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.dispatcher.dispatch_mut(&mut request).await {
                Err(e) if e.is_server() && retries < self.server_error_retries => {
                    retries += 1;
                    warn!(
                        path = %request.path,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Server error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::post(path).json(body)?;
        self.execute(request).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::new(Method::DELETE, path)).await?;
        Ok(())
    }

    /// Exchange username and password for a token pair.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let request = ApiRequest::post(TOKEN_PATH).form(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", ""),
        ]);
        let response = self.dispatcher.dispatch(request).await?;
        let token: TokenResponse = response.json()?;
        debug!(token_type = %token.token_type, "Authenticated");
        Ok(token)
    }

    /// Revoke `refresh_token` on the server.
    ///
    /// 200/202 (parsed when possible), 204 and 401 all count as a logical
    /// logout; 204 and 401 are synthesized locally.
    pub async fn revoke(&self, refresh_token: &str) -> Result<LogoutOutcome, ApiError> {
        let request = ApiRequest::post(LOGOUT_PATH).json(&json!({ "refresh_token": refresh_token }))?;
        match self.dispatcher.dispatch(request).await {
            Ok(response) if response.status == 204 || response.body.trim().is_empty() => {
                Ok(LogoutOutcome::logged_out())
            }
            Ok(response) => Ok(response.json().unwrap_or_else(|_| LogoutOutcome::logged_out())),
            Err(e) if e.is_auth_failure() => {
                info!("Server reports session already ended");
                Ok(LogoutOutcome::already_logged_out())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get(ME_PATH).await
    }
}

// ============================================================================
// Tests
// ============================================================================
