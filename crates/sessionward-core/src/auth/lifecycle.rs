//! Login/logout entry points and session queries for the front end.
//!
//! `SessionLifecycle` owns one instance of every session component. Login
//! and logout abort any in-flight refresh and reject its waiters before
//! touching the store, so a superseded refresh can never write over them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::claims::{self, AccessDecision, AccessRequirement, Clock, SessionClaims, SystemClock};
use super::signal::{SessionEnded, SessionSignal};
use super::storage::{CredentialStore, Durability, TokenPair};
use crate::api::{
    ApiClient, ApiError, HttpTransport, LogoutOutcome, RefreshCoordinator, RequestDispatcher,
    Transport,
};
use crate::config::Config;

pub struct SessionLifecycle {
    store: Arc<CredentialStore>,
    signal: SessionSignal,
    coordinator: Arc<RefreshCoordinator>,
    client: ApiClient,
    clock: Arc<dyn Clock>,
}

impl SessionLifecycle {
    pub fn new(
        config: &Config,
        store: CredentialStore,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(store);
        let signal = SessionSignal::new();
        let coordinator = Arc::new(RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            signal.clone(),
            config.request_timeout(),
        ));
        let dispatcher = Arc::new(RequestDispatcher::new(
            transport,
            store.clone(),
            coordinator.clone(),
            signal.clone(),
            &config.terminal_auth_codes,
            config.request_timeout(),
        ));
        let client = ApiClient::new(dispatcher, config);

        Self {
            store,
            signal,
            coordinator,
            client,
            clock,
        }
    }

    /// HTTP transport, configured backends, system clock.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.api_base_url, config.request_timeout())?;
        let store = CredentialStore::from_config(config)?;
        Ok(Self::new(
            config,
            store,
            Arc::new(transport),
            Arc::new(SystemClock),
        ))
    }

    /// Client for business requests; shares this session's credentials.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnded> {
        self.signal.subscribe()
    }

    /// Restore whatever session survived from an earlier run.
    pub fn hydrate(&self) -> Option<SessionClaims> {
        let initial = self.store.read_initial();
        if initial.pair.is_empty() {
            return None;
        }
        self.signal.arm();
        info!(durability = ?initial.durability, "Restored session");
        initial.pair.access.as_deref().and_then(claims::decode)
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        durability: Durability,
    ) -> Result<Option<SessionClaims>, ApiError> {
        let token = self.client.authenticate(username, password).await?;

        self.coordinator.cancel_pending().await;
        self.store.set_remember(durability.is_persistent());
        self.store.write(
            &TokenPair::new(token.access_token.clone(), token.refresh_token),
            durability,
        );
        self.signal.arm();
        info!(username, durability = ?durability, "Signed in");

        Ok(claims::decode(&token.access_token))
    }

    /// Best-effort server logout; local state is cleared regardless.
    pub async fn logout(&self) -> Result<LogoutOutcome, ApiError> {
        let outcome = match self.store.read_current().refresh {
            Some(refresh_token) => self.client.revoke(&refresh_token).await,
            None => Ok(LogoutOutcome::already_logged_out()),
        };
        if let Err(ref e) = outcome {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.coordinator.cancel_pending().await;
        self.store.clear();
        self.signal.end("logout");
        outcome
    }

    pub fn claims(&self) -> Option<SessionClaims> {
        self.store.read_current().access.as_deref().and_then(claims::decode)
    }

    pub fn is_expired(&self) -> bool {
        claims::is_expired(self.store.read_current().access.as_deref(), self.clock.now_ms())
    }

    pub fn authorize(&self, requirement: AccessRequirement) -> AccessDecision {
        claims::authorize(
            self.store.read_current().access.as_deref(),
            self.clock.now_ms(),
            requirement,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::ApiRequest;
    use crate::testing::{jwt, lifecycle_fixture, RefreshMode, Reply, FAR_FUTURE_EXP};

    fn token_reply(access: &str, refresh: &str) -> Reply {
        Reply::status(
            200,
            &json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}).to_string(),
        )
    }

    #[tokio::test]
    async fn test_login_durable_then_refresh_rotates_access_only() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        let original = jwt(json!({"sub": "alice", "exp": 1}));
        transport.always("/auth/token", token_reply(&original, "refresh-orig"));

        let claims = session.login("alice", "pw", Durability::Persistent).await.unwrap();
        assert_eq!(claims.unwrap().subject, "alice");
        assert!(session.store().remember());

        // The server no longer accepts the original credential.
        session
            .client()
            .execute(ApiRequest::get("/orders"))
            .await
            .unwrap();
        assert_eq!(transport.refresh_calls(), 1);

        let persistent = session.store().read_from(Durability::Persistent);
        assert_eq!(persistent.access, Some(transport.valid_access()));
        assert_eq!(persistent.refresh.as_deref(), Some("refresh-orig"));
        assert!(session.store().read_from(Durability::Ephemeral).is_empty());
    }

    #[tokio::test]
    async fn test_login_ephemeral_clears_persistent() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        session
            .store()
            .write(&TokenPair::new("stale-a", "stale-r"), Durability::Persistent);
        transport.always("/auth/token", token_reply("a", "r"));

        session.login("bob", "pw", Durability::Ephemeral).await.unwrap();
        assert!(!session.store().remember());
        assert!(session.store().read_from(Durability::Persistent).is_empty());
        assert_eq!(session.store().read_from(Durability::Ephemeral), TokenPair::new("a", "r"));
    }

    #[tokio::test]
    async fn test_login_during_inflight_refresh() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        let session = Arc::new(session);
        transport.gate_refresh();
        session
            .store()
            .write(&TokenPair::new("expired", "refresh-old"), Durability::Persistent);

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.client().execute(ApiRequest::get("/orders")).await })
        };
        while transport.refresh_inflight() < 1 {
            tokio::task::yield_now().await;
        }

        transport.always("/auth/token", token_reply("fresh-a", "fresh-r"));
        session.login("bob", "pw", Durability::Persistent).await.unwrap();
        assert_eq!(transport.refresh_inflight(), 0);
        assert_eq!(pending.await.unwrap(), Err(ApiError::Unauthorized));
        assert_eq!(session.store().read_current(), TokenPair::new("fresh-a", "fresh-r"));

        // The new session's first 401 starts the only outstanding refresh.
        let next = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.client().execute(ApiRequest::get("/orders")).await })
        };
        while transport.refresh_inflight() < 1 {
            tokio::task::yield_now().await;
        }
        transport.release_refresh();

        assert_eq!(next.await.unwrap().unwrap().status, 200);
        assert_eq!(transport.refresh_calls(), 2);
        assert_eq!(transport.refresh_peak(), 1);
        let pair = session.store().read_from(Durability::Persistent);
        assert_eq!(pair.access, Some(transport.valid_access()));
        assert_eq!(pair.refresh.as_deref(), Some("fresh-r"));
    }

    #[tokio::test]
    async fn test_login_failure_leaves_store_untouched() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        transport.always("/auth/token", Reply::status(401, r#"{"detail": "Incorrect username or password"}"#));

        let err = session.login("alice", "wrong", Durability::Persistent).await.unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
        assert!(session.store().read_current().is_empty());
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_is_local() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);

        let outcome = session.logout().await.unwrap();
        assert_eq!(outcome.code, LogoutOutcome::ALREADY_LOGGED_OUT);
        assert!(transport.calls_to("/auth/logout").is_empty());
    }

    #[tokio::test]
    async fn test_logout_revokes_and_signals_once() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        let mut ended = session.subscribe();
        transport.always("/auth/token", token_reply("a", "r"));
        transport.always("/auth/logout", Reply::status(204, ""));

        session.login("alice", "pw", Durability::Persistent).await.unwrap();
        let outcome = session.logout().await.unwrap();
        assert_eq!(outcome.code, LogoutOutcome::LOGGED_OUT);

        let calls = transport.calls_to("/auth/logout");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].body,
            crate::api::transport::RequestBody::Json(json!({"refresh_token": "r"}))
        );
        assert!(session.store().read_current().is_empty());
        assert!(ended.try_recv().is_ok());

        session.logout().await.unwrap();
        assert!(ended.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_unreachable() {
        let (session, transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 0);
        transport.always("/auth/token", token_reply("a", "r"));
        transport.always(
            "/auth/logout",
            Reply::Fail(crate::api::TransportError::Connect("refused".into())),
        );

        session.login("alice", "pw", Durability::Ephemeral).await.unwrap();
        assert!(session.logout().await.unwrap_err().is_network());
        assert!(session.store().read_current().is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_and_authorize() {
        let now = 1_000_000;
        let (session, _transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, now);
        assert_eq!(session.hydrate(), None);
        assert_eq!(session.authorize(AccessRequirement::Authenticated), AccessDecision::SignInRequired);

        let access = jwt(json!({"username": "carol", "admin": true, "exp": FAR_FUTURE_EXP}));
        session.store().set_remember(true);
        session
            .store()
            .write(&TokenPair::new(access, "r"), Durability::Persistent);

        let claims = session.hydrate().unwrap();
        assert_eq!(claims.subject, "carol");
        assert!(!session.is_expired());
        assert_eq!(session.authorize(AccessRequirement::Admin), AccessDecision::Granted);
        assert_eq!(session.authorize(AccessRequirement::Superuser), AccessDecision::Forbidden);
    }

    #[tokio::test]
    async fn test_is_expired_uses_clock() {
        let (session, _transport) = lifecycle_fixture(RefreshMode::RotateAccessOnly, 5_000);
        let access = jwt(json!({"sub": "dave", "exp": 5}));
        session.store().write(&TokenPair::new(access, "r"), Durability::Ephemeral);
        assert!(session.is_expired());
        assert_eq!(session.claims().unwrap().subject, "dave");
    }
}
