//! Outbound request pipeline: attach the credential, classify the response,
//! refresh once on an ordinary 401.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::refresh::RefreshCoordinator;
use super::transport::{ApiRequest, ApiResponse, Transport, TransportError};
use super::ApiError;
use crate::auth::{CredentialStore, SessionSignal};

pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    signal: SessionSignal,
    terminal_codes: HashSet<String>,
    timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        signal: SessionSignal,
        terminal_codes: &[String],
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            signal,
            terminal_codes: terminal_codes.iter().cloned().collect(),
            timeout,
        }
    }

    pub async fn dispatch(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch_mut(&mut request).await
    }

    /// Like [`dispatch`](Self::dispatch), but the retry marker stays on the
    /// caller's request so later caller-level attempts never refresh twice.
    pub async fn dispatch_mut(&self, request: &mut ApiRequest) -> Result<ApiResponse, ApiError> {
        if let Some(access) = self.store.read_current().access {
            request.attach_bearer(access);
        }

        loop {
            let response = self.send(request).await?;
            if response.is_success() {
                return Ok(response);
            }

            let error = self.classify(&response);
            debug!(path = %request.path, status = response.status, error = %error, "Request failed");
            match error {
                ApiError::AuthStop { ref code } => {
                    self.stop_session(code).await;
                    return Err(error);
                }
                ApiError::Unauthorized if !request.is_retried() && !request.is_auth_flow() => {
                    request.mark_retried();
                    let stale = request.bearer().map(str::to_owned);
                    match self.coordinator.refresh(stale.as_deref()).await {
                        Ok(access) => {
                            debug!(path = %request.path, "Retrying with refreshed credential");
                            request.attach_bearer(access);
                        }
                        Err(e) => {
                            debug!(path = %request.path, error = %e, "Refresh unavailable, surfacing 401");
                            return Err(error);
                        }
                    }
                }
                _ => return Err(error),
            }
        }
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let result = match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        result.map_err(|e| {
            warn!(path = %request.path, error = %e, "Network failure");
            ApiError::from(e)
        })
    }

    fn classify(&self, response: &ApiResponse) -> ApiError {
        if response.status == 401 {
            if let Some(code) = self.terminal_code(&response.body) {
                return ApiError::AuthStop { code };
            }
        }
        ApiError::from_status(response.status, &response.body)
    }

    /// Looks for a configured terminal code in `code`, `detail`,
    /// `detail.code` or `error`.
    fn terminal_code(&self, body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        let found = [
            value.get("code"),
            value.get("detail"),
            value.pointer("/detail/code"),
            value.get("error"),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|code| self.terminal_codes.contains(*code))
        .map(str::to_owned);
        found
    }

    async fn stop_session(&self, code: &str) {
        warn!(code, "Server ended the session, skipping refresh");
        self.coordinator.cancel_pending().await;
        self.store.clear();
        self.signal.end("authentication stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
