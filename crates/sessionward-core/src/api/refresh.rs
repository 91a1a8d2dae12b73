//! Single-flight credential refresh.
//!
//! At most one refresh call is outstanding at any instant. Callers that need
//! a refresh while one is in flight queue up and receive the same outcome, in
//! the order they arrived. The network call runs on its own task, so a caller
//! that stops waiting cannot leave the coordinator stuck in `Refreshing`.
//!
//! Login, logout and authentication-stop call [`RefreshCoordinator::cancel_pending`],
//! which aborts the in-flight call and bumps a generation counter: a refresh
//! that completes for an older generation is discarded without touching the
//! store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{ApiRequest, RequestBody, Transport, TransportError};
use crate::auth::{CredentialStore, SessionSignal, TokenPair};

pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Refresh request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Refresh cancelled by a session change")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

type Outcome = Result<String, RefreshError>;

struct CoordinatorState {
    phase: RefreshPhase,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
    generation: u64,
    /// Task driving the outstanding refresh call, if any.
    inflight: Option<JoinHandle<()>>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    /// Absent means "keep the current refresh token".
    refresh_token: Option<String>,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    signal: SessionSignal,
    timeout: Duration,
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        signal: SessionSignal,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            signal,
            timeout,
            state: Mutex::new(CoordinatorState {
                phase: RefreshPhase::Idle,
                waiters: VecDeque::new(),
                generation: 0,
                inflight: None,
            }),
        }
    }

    pub async fn phase(&self) -> RefreshPhase {
        self.state.lock().await.phase
    }

    /// Callers currently waiting on the in-flight refresh.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiters.len()
    }

    /// Obtain a fresh access credential.
    ///
    /// `stale_access` is the credential the failed request carried. If the
    /// store already holds a different one, a refresh finished in the
    /// meantime and that credential is returned without a network call.
    pub async fn refresh(self: &Arc<Self>, stale_access: Option<&str>) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            match state.phase {
                RefreshPhase::Refreshing => {
                    state.waiters.push_back(tx);
                    debug!(waiters = state.waiters.len(), "Joined in-flight refresh");
                }
                RefreshPhase::Idle => {
                    if let Some(current) = self.rotated_since(stale_access) {
                        debug!("Credential already rotated, skipping refresh");
                        return Ok(current);
                    }
                    state.phase = RefreshPhase::Refreshing;
                    state.waiters.push_back(tx);
                    let generation = state.generation;
                    let coordinator = Arc::clone(self);
                    state.inflight = Some(tokio::spawn(async move { coordinator.drive(generation).await }));
                }
            }
        }
        rx.await.unwrap_or(Err(RefreshError::Cancelled))
    }

    /// Abort the in-flight refresh call, return to `Idle` and reject every
    /// queued waiter.
    ///
    /// The aborted call is fully dropped before `Idle` becomes visible, so a
    /// refresh started afterwards is never concurrent with it.
    pub async fn cancel_pending(&self) {
        let waiters = {
            let mut state = self.state.lock().await;
            if let Some(task) = state.inflight.take() {
                task.abort();
                // An aborted task never resumes, so waiting here while holding
                // the lock cannot deadlock with `drive`.
                let _ = task.await;
                debug!("Aborted in-flight refresh call");
            }
            state.generation += 1;
            state.phase = RefreshPhase::Idle;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "Cancelling queued refresh waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshError::Cancelled));
        }
    }

    fn rotated_since(&self, stale_access: Option<&str>) -> Option<String> {
        let stale = stale_access?;
        let current = self.store.read_current().access?;
        (current != stale).then_some(current)
    }

    async fn drive(&self, generation: u64) {
        let outcome = self.call_refresh().await;

        let waiters = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                debug!("Discarding refresh result from a superseded session");
                return;
            }
            // Store mutations happen under the lock so they cannot interleave
            // with cancel_pending.
            match outcome {
                Ok(ref pair) => {
                    let durability = self.store.current_durability();
                    self.store.write(pair, durability);
                    info!(durability = ?durability, waiters = state.waiters.len(), "Credential refreshed");
                }
                Err(ref e) => {
                    warn!(error = %e, waiters = state.waiters.len(), "Credential refresh failed, ending session");
                    self.store.clear();
                    self.signal.end("refresh failed");
                }
            }
            state.phase = RefreshPhase::Idle;
            state.inflight = None;
            std::mem::take(&mut state.waiters)
        };

        let result: Outcome = outcome.map(|pair| pair.access.unwrap_or_default());
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    async fn call_refresh(&self) -> Result<TokenPair, RefreshError> {
        let refresh_token = self
            .store
            .read_current()
            .refresh
            .ok_or(RefreshError::MissingRefreshToken)?;

        let mut request = ApiRequest::post(REFRESH_PATH);
        request.body = RequestBody::Json(json!({ "refresh_token": refresh_token }));

        let response = tokio::time::timeout(self.timeout, self.transport.send(&request))
            .await
            .map_err(|_| RefreshError::Transport(TransportError::Timeout))??;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
            });
        }
        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        Ok(TokenPair {
            access: Some(body.access_token),
            refresh: Some(body.refresh_token.unwrap_or(refresh_token)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
