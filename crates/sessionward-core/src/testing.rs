//! Test doubles: a scripted transport, an unavailable backend, fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::api::{
    ApiClient, ApiRequest, ApiResponse, RefreshCoordinator, RequestDispatcher, Transport,
    TransportError,
};
use crate::api::transport::RequestBody;
use crate::auth::backend::{KeyValueBackend, StoreError};
use crate::auth::{Clock, CredentialStore, SessionLifecycle, SessionSignal};
use crate::config::Config;

/// Unsigned JWT carrying `claims`.
pub fn jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

/// Expiry far in the future (2100-01-01) in seconds.
pub const FAR_FUTURE_EXP: i64 = 4_102_444_800;

/// Behaves like storage disabled by privacy settings.
pub struct UnavailableBackend;

impl KeyValueBackend for UnavailableBackend {
    fn read(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("disabled".into()))
    }

    fn write(&self, _key: &str, _value: Option<&str>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disabled".into()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// Fake transport
// ============================================================================

#[derive(Debug, Clone)]
pub enum Reply {
    Respond(ApiResponse),
    Fail(TransportError),
    Hang,
}

impl Reply {
    pub fn status(status: u16, body: &str) -> Self {
        Reply::Respond(ApiResponse::new(status, body))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RefreshMode {
    /// New access token, no refresh token in the response.
    RotateAccessOnly,
    /// New access and refresh tokens.
    RotateBoth,
    Reject(u16),
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

struct FakeState {
    valid_access: String,
    issued: usize,
    calls: Vec<RecordedCall>,
    fixed: HashMap<String, Reply>,
}

/// Scripted server. Business paths answer 200 when the bearer matches the
/// currently valid access token and 401 otherwise, unless a fixed reply is
/// registered for the path.
pub struct FakeTransport {
    mode: RefreshMode,
    state: Mutex<FakeState>,
    gate: Semaphore,
    gated: std::sync::atomic::AtomicBool,
    refresh_calls: AtomicUsize,
    refresh_responses: AtomicUsize,
    refresh_inflight: AtomicUsize,
    refresh_peak: AtomicUsize,
}

/// Counts a refresh call as outstanding until it returns or is dropped.
struct InflightGuard<'a>(&'a AtomicUsize);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    pub fn new(mode: RefreshMode) -> Self {
        Self {
            mode,
            state: Mutex::new(FakeState {
                valid_access: "access-0".into(),
                issued: 0,
                calls: Vec::new(),
                fixed: HashMap::new(),
            }),
            gate: Semaphore::new(0),
            gated: std::sync::atomic::AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            refresh_responses: AtomicUsize::new(0),
            refresh_inflight: AtomicUsize::new(0),
            refresh_peak: AtomicUsize::new(0),
        }
    }

    pub fn always(&self, path: &str, reply: Reply) {
        self.state.lock().unwrap().fixed.insert(path.to_string(), reply);
    }

    /// Hold refresh responses until `release_refresh`.
    pub fn gate_refresh(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.gate.add_permits(1);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_responses(&self) -> usize {
        self.refresh_responses.load(Ordering::SeqCst)
    }

    /// Refresh calls currently outstanding.
    pub fn refresh_inflight(&self) -> usize {
        self.refresh_inflight.load(Ordering::SeqCst)
    }

    /// Most refresh calls ever outstanding at once.
    pub fn refresh_peak(&self) -> usize {
        self.refresh_peak.load(Ordering::SeqCst)
    }

    pub fn valid_access(&self) -> String {
        self.state.lock().unwrap().valid_access.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.calls_to(path).into_iter().map(|c| c.bearer).collect()
    }

    async fn refresh(&self) -> Result<ApiResponse, TransportError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.refresh_inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_peak.fetch_max(outstanding, Ordering::SeqCst);
        let _inflight = InflightGuard(&self.refresh_inflight);

        if self.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        let reply = match self.mode {
            RefreshMode::RotateAccessOnly | RefreshMode::RotateBoth => {
                let mut state = self.state.lock().unwrap();
                state.issued += 1;
                let access = jwt(json!({"sub": "alice", "exp": FAR_FUTURE_EXP, "n": state.issued}));
                state.valid_access = access.clone();
                let body = if matches!(self.mode, RefreshMode::RotateBoth) {
                    json!({"access_token": access, "refresh_token": format!("refresh-{}", state.issued)})
                } else {
                    json!({"access_token": access})
                };
                ApiResponse::new(200, body.to_string())
            }
            RefreshMode::Reject(status) => ApiResponse::new(status, r#"{"detail": "Invalid refresh token"}"#),
            RefreshMode::Hang => std::future::pending().await,
        };
        self.refresh_responses.fetch_add(1, Ordering::SeqCst);
        Ok(reply)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let fixed = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RecordedCall {
                path: request.path.clone(),
                bearer: request.bearer().map(str::to_owned),
                body: request.body.clone(),
            });
            state.fixed.get(&request.path).cloned()
        };

        match fixed {
            Some(Reply::Respond(response)) => return Ok(response),
            Some(Reply::Fail(e)) => return Err(e),
            Some(Reply::Hang) => return std::future::pending().await,
            None => {}
        }

        if request.path == "/auth/refresh" {
            return self.refresh().await;
        }

        let valid = self.valid_access();
        if request.bearer() == Some(valid.as_str()) {
            let body = if request.path == "/auth/me" {
                json!({"id": 1, "username": "alice", "email": "alice@example.com", "active": true})
            } else {
                json!({"ok": true, "path": request.path})
            };
            Ok(ApiResponse::new(200, body.to_string()))
        } else {
            Ok(ApiResponse::new(401, r#"{"detail": "Not authenticated"}"#))
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const TEST_TIMEOUT: Duration = Duration::from_millis(8000);

pub struct CoordinatorFixture {
    pub transport: Arc<FakeTransport>,
    pub store: Arc<CredentialStore>,
    pub signal: SessionSignal,
    pub coordinator: Arc<RefreshCoordinator>,
}

pub fn coordinator_fixture(mode: RefreshMode) -> CoordinatorFixture {
    let transport = Arc::new(FakeTransport::new(mode));
    let store = Arc::new(CredentialStore::in_memory());
    let signal = SessionSignal::new();
    let coordinator = Arc::new(RefreshCoordinator::new(
        transport.clone(),
        store.clone(),
        signal.clone(),
        TEST_TIMEOUT,
    ));
    CoordinatorFixture {
        transport,
        store,
        signal,
        coordinator,
    }
}

pub struct DispatcherFixture {
    pub transport: Arc<FakeTransport>,
    pub store: Arc<CredentialStore>,
    pub signal: SessionSignal,
    pub coordinator: Arc<RefreshCoordinator>,
    pub dispatcher: Arc<RequestDispatcher>,
}

pub fn dispatcher_fixture(mode: RefreshMode) -> DispatcherFixture {
    let CoordinatorFixture {
        transport,
        store,
        signal,
        coordinator,
    } = coordinator_fixture(mode);
    let dispatcher = Arc::new(RequestDispatcher::new(
        transport.clone(),
        store.clone(),
        coordinator.clone(),
        signal.clone(),
        &Config::default().terminal_auth_codes,
        TEST_TIMEOUT,
    ));
    DispatcherFixture {
        transport,
        store,
        signal,
        coordinator,
        dispatcher,
    }
}

pub fn client_fixture(mode: RefreshMode) -> (ApiClient, DispatcherFixture) {
    let fx = dispatcher_fixture(mode);
    let config = Config {
        initial_backoff_ms: 10,
        ..Config::default()
    };
    (ApiClient::new(fx.dispatcher.clone(), &config), fx)
}

pub fn lifecycle_fixture(mode: RefreshMode, now_ms: i64) -> (SessionLifecycle, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new(mode));
    let lifecycle = SessionLifecycle::new(
        &Config::default(),
        CredentialStore::in_memory(),
        transport.clone(),
        Arc::new(FixedClock(now_ms)),
    );
    (lifecycle, transport)
}
