// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OP Connect Flow
//!
//! Starts an Open-Banking account connection for an authenticated user:
//!
//! 1. Client-credentials token from the AIS provider (mTLS)
//! 2. Remote authorization intent, expiring in one hour
//! 3. Fresh `state` and `nonce` (24 CSPRNG bytes each)
//! 4. RS256 FAPI request object bound to the authorization id
//! 5. Pending authorization persisted under `state`
//! 6. Browser redirect URL to the provider's authorize endpoint
//!
//! The flow is terminal on the first failing step. Remote side effects
//! (issued token, created intent) are not rolled back; they expire
//! provider-side. Nothing is retried here.
//!
//! Every remote or storage step runs under its own deadline. Dropping the
//! future returned by [`ConnectService::start`] cancels whatever step is in
//! flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::OpConfig;
use crate::models::UserId;
use crate::providers::{AisClient, AisError, AisGateway};
use crate::signing::{RequestObjectParams, RequestObjectSigner, SigningError};
use crate::storage::{PendingAuthorization, PendingAuthorizationStore, RedbPendingStore, StoreError};

pub const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const AUTHORIZATION_CREATE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PERSIST_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifetime requested for the remote authorization intent.
pub const AUTHORIZATION_INTENT_TTL_SECS: i64 = 3600;

/// Raw bytes behind each `state` / `nonce` value.
pub const STATE_NONCE_BYTES: usize = 24;

/// Scope requested from the end user (serialized as `openid+accounts`).
pub const AUTHORIZE_SCOPE: &str = "openid accounts";

// =============================================================================
// Clock
// =============================================================================

/// Time source for expiry and `iat` computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Step of the connect flow, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    TokenExchange,
    AuthorizationCreate,
    StateNonce,
    Signing,
    Persistence,
    RedirectUrl,
}

impl ConnectStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectStep::TokenExchange => "token_exchange",
            ConnectStep::AuthorizationCreate => "authorization_create",
            ConnectStep::StateNonce => "state_nonce",
            ConnectStep::Signing => "signing",
            ConnectStep::Persistence => "persistence",
            ConnectStep::RedirectUrl => "redirect_url",
        }
    }
}

impl std::fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("token exchange failed: {0}")]
    TokenExchange(#[source] AisError),

    #[error("authorization create failed: {0}")]
    AuthorizationCreate(#[source] AisError),

    #[error("secure random generation failed")]
    Randomness,

    #[error("request object signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("persisting pending authorization failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("invalid authorize URL: {0}")]
    RedirectUrl(#[from] url::ParseError),

    #[error("{step} timed out after {after:?}")]
    Timeout { step: ConnectStep, after: Duration },
}

impl ConnectError {
    /// The step that failed.
    pub fn step(&self) -> ConnectStep {
        match self {
            ConnectError::TokenExchange(_) => ConnectStep::TokenExchange,
            ConnectError::AuthorizationCreate(_) => ConnectStep::AuthorizationCreate,
            ConnectError::Randomness => ConnectStep::StateNonce,
            ConnectError::Signing(_) => ConnectStep::Signing,
            ConnectError::Persistence(_) => ConnectStep::Persistence,
            ConnectError::RedirectUrl(_) => ConnectStep::RedirectUrl,
            ConnectError::Timeout { step, .. } => *step,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Client-facing OP settings used by the flow.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub auth_base: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub audience: String,
}

impl ConnectSettings {
    pub fn from_config(config: &OpConfig) -> Self {
        Self {
            auth_base: config.auth_base.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            audience: config.request_audience.clone(),
        }
    }
}

/// Orchestrates one connect attempt per call to [`start`](Self::start).
///
/// All collaborators are read-only after construction, so one instance
/// serves concurrent flows.
pub struct ConnectService<G = AisClient, S = RedbPendingStore> {
    gateway: G,
    signer: RequestObjectSigner,
    store: S,
    settings: ConnectSettings,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl<G, S> ConnectService<G, S>
where
    G: AisGateway,
    S: PendingAuthorizationStore,
{
    pub fn new(gateway: G, signer: RequestObjectSigner, store: S, settings: ConnectSettings) -> Self {
        Self {
            gateway,
            signer,
            store,
            settings,
            clock: Arc::new(SystemClock),
            rng: SystemRandom::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the connect flow for `user_id` and return the authorize URL.
    pub async fn start(&self, user_id: &UserId) -> Result<String, ConnectError> {
        let flow_id = Uuid::new_v4();
        info!(%flow_id, %user_id, "starting OP connect flow");

        let result = self.run(user_id, flow_id).await;
        if let Err(e) = &result {
            warn!(%flow_id, %user_id, step = %e.step(), error = %e, "OP connect flow failed");
        }
        result
    }

    async fn run(&self, user_id: &UserId, flow_id: Uuid) -> Result<String, ConnectError> {
        let access_token = with_deadline(
            ConnectStep::TokenExchange,
            TOKEN_EXCHANGE_TIMEOUT,
            self.gateway.client_credentials_token(),
        )
        .await?
        .map_err(ConnectError::TokenExchange)?;
        info!(%flow_id, step = %ConnectStep::TokenExchange, "client credentials token acquired");

        let expires = self.clock.now() + chrono::Duration::seconds(AUTHORIZATION_INTENT_TTL_SECS);
        let authorization_id = with_deadline(
            ConnectStep::AuthorizationCreate,
            AUTHORIZATION_CREATE_TIMEOUT,
            self.gateway.create_authorization(&access_token, expires),
        )
        .await?
        .map_err(ConnectError::AuthorizationCreate)?;
        info!(
            %flow_id,
            step = %ConnectStep::AuthorizationCreate,
            authorization_id = %authorization_id,
            "authorization intent created"
        );

        let state = generate_token(&self.rng)?;
        let nonce = generate_token(&self.rng)?;

        let request_object = self.signer.sign(
            &RequestObjectParams {
                audience: &self.settings.audience,
                client_id: &self.settings.client_id,
                redirect_uri: &self.settings.redirect_uri,
                scope: AUTHORIZE_SCOPE,
                state: &state,
                nonce: &nonce,
                authorization_id: &authorization_id,
            },
            self.clock.now(),
        )?;
        info!(%flow_id, step = %ConnectStep::Signing, kid = self.signer.kid(), "request object signed");

        let record = PendingAuthorization {
            state: state.clone(),
            user_id: user_id.clone(),
            authorization_id,
            nonce,
            created_at: self.clock.now(),
        };
        with_deadline(
            ConnectStep::Persistence,
            PERSIST_TIMEOUT,
            self.store.save_pending(record),
        )
        .await??;
        info!(%flow_id, step = %ConnectStep::Persistence, "pending authorization stored");

        let url = authorize_url(&self.settings, &request_object)?;
        info!(%flow_id, step = %ConnectStep::RedirectUrl, "authorize URL built");
        Ok(url)
    }
}

async fn with_deadline<F: Future>(
    step: ConnectStep,
    after: Duration,
    fut: F,
) -> Result<F::Output, ConnectError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ConnectError::Timeout { step, after })
}

/// URL-safe, unpadded base64 of fresh CSPRNG bytes.
pub fn generate_token(rng: &dyn SecureRandom) -> Result<String, ConnectError> {
    let mut bytes = [0u8; STATE_NONCE_BYTES];
    rng.fill(&mut bytes).map_err(|_| ConnectError::Randomness)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// `{auth_base}/oauth/authorize?request=..&response_type=code&client_id=..&scope=openid+accounts`
fn authorize_url(settings: &ConnectSettings, request_object: &str) -> Result<String, ConnectError> {
    let mut url = Url::parse(&format!("{}/oauth/authorize", settings.auth_base))?;
    url.query_pairs_mut()
        .append_pair("request", request_object)
        .append_pair("response_type", "code")
        .append_pair("client_id", &settings.client_id)
        .append_pair("scope", AUTHORIZE_SCOPE);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::AisOperation;
    use crate::signing::tests::{test_decoding_key, test_signer};
    use crate::storage::InMemoryPendingStore;
    use chrono::TimeZone;
    use jsonwebtoken::{decode, Algorithm, Validation};
    use reqwest::StatusCode;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted gateway that records how often each call was made.
    struct FakeGateway {
        token: Result<String, StatusCode>,
        authorization_id: String,
        token_calls: AtomicUsize,
        authorization_calls: AtomicUsize,
        seen: Mutex<Vec<(String, DateTime<Utc>)>>,
        token_delay: Option<Duration>,
        authorization_delay: Option<Duration>,
    }

    impl FakeGateway {
        fn ok(token: &str, authorization_id: &str) -> Self {
            Self {
                token: Ok(token.to_string()),
                authorization_id: authorization_id.to_string(),
                token_calls: AtomicUsize::new(0),
                authorization_calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                token_delay: None,
                authorization_delay: None,
            }
        }

        fn token_status(status: StatusCode) -> Self {
            Self {
                token: Err(status),
                ..Self::ok("unused", "unused")
            }
        }
    }

    impl AisGateway for FakeGateway {
        async fn client_credentials_token(&self) -> Result<String, AisError> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }
            self.token.clone().map_err(|status| AisError::Status {
                operation: AisOperation::Token,
                status,
                body: "boom".to_string(),
            })
        }

        async fn create_authorization(
            &self,
            access_token: &str,
            expires: DateTime<Utc>,
        ) -> Result<String, AisError> {
            self.authorization_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.authorization_delay {
                tokio::time::sleep(delay).await;
            }
            self.seen
                .lock()
                .unwrap()
                .push((access_token.to_string(), expires));
            if self.authorization_id.is_empty() {
                return Err(AisError::InvalidResponse {
                    operation: AisOperation::CreateAuthorization,
                    status: StatusCode::CREATED,
                    reason: "empty authorizationId".to_string(),
                    body: r#"{"authorizationId":""}"#.to_string(),
                });
            }
            Ok(self.authorization_id.clone())
        }
    }

    fn settings() -> ConnectSettings {
        ConnectSettings {
            auth_base: "https://sandbox-auth.example.com".to_string(),
            client_id: "client-abc".to_string(),
            redirect_uri: "https://app.example.com/v1/connect/op/callback".to_string(),
            audience: "https://sandbox-api.example.com".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn service(gateway: FakeGateway) -> ConnectService<FakeGateway, InMemoryPendingStore> {
        ConnectService::new(gateway, test_signer(), InMemoryPendingStore::new(), settings())
            .with_clock(Arc::new(FixedClock(fixed_now())))
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn start_returns_authorize_url_and_persists_pending_record() {
        let svc = service(FakeGateway::ok("tok1", "auth-123"));

        let url = svc.start(&UserId::new("user-42")).await.unwrap();

        assert!(url.starts_with("https://sandbox-auth.example.com/oauth/authorize?"));
        assert!(url.contains("scope=openid+accounts"));
        let params = query(&url);
        assert_eq!(params.len(), 4);
        assert!(params.values().all(|v| !v.is_empty()));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-abc");
        assert_eq!(params["scope"], "openid accounts");

        let records = svc.store().all().await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.user_id.as_str(), "user-42");
        assert_eq!(record.authorization_id, "auth-123");
        assert_eq!(record.created_at, fixed_now());

        let seen = svc.gateway.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("tok1".to_string(), fixed_now() + chrono::Duration::seconds(3600))]);

        // The request object binds the same state, nonce and authorization id
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://sandbox-api.example.com"]);
        validation.validate_exp = false;
        let claims = decode::<serde_json::Value>(&params["request"], &test_decoding_key(), &validation)
            .unwrap()
            .claims;
        assert_eq!(claims["state"], record.state.as_str());
        assert_eq!(claims["nonce"], record.nonce.as_str());
        assert_eq!(claims["claims"]["userinfo"]["authorizationId"]["value"], "auth-123");
        assert_eq!(claims["iat"], fixed_now().timestamp());
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            300
        );
        assert_eq!(claims["max_age"], 86_400);
    }

    #[tokio::test]
    async fn token_failure_skips_authorization_create() {
        let svc = service(FakeGateway::token_status(StatusCode::INTERNAL_SERVER_ERROR));

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(err, ConnectError::TokenExchange(_)));
        assert_eq!(err.step(), ConnectStep::TokenExchange);
        assert_eq!(svc.gateway.token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.gateway.authorization_calls.load(Ordering::SeqCst), 0);
        assert!(svc.store().all().await.is_empty());
    }

    #[tokio::test]
    async fn empty_authorization_id_is_not_persisted() {
        let svc = service(FakeGateway::ok("tok1", ""));

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(err, ConnectError::AuthorizationCreate(_)));
        assert_eq!(err.step(), ConnectStep::AuthorizationCreate);
        assert!(svc.store().all().await.is_empty());
    }

    /// Store that always reports a state collision.
    struct CollidingStore;

    impl PendingAuthorizationStore for CollidingStore {
        async fn save_pending(&self, record: PendingAuthorization) -> Result<(), StoreError> {
            Err(StoreError::DuplicateState(record.state))
        }
    }

    #[tokio::test]
    async fn persistence_failure_yields_no_url() {
        let svc = ConnectService::new(
            FakeGateway::ok("tok1", "auth-123"),
            test_signer(),
            CollidingStore,
            settings(),
        );

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Persistence(StoreError::DuplicateState(_))
        ));
        assert_eq!(err.step(), ConnectStep::Persistence);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_token_exchange_times_out() {
        let mut gateway = FakeGateway::ok("tok1", "auth-123");
        gateway.token_delay = Some(Duration::from_secs(30));
        let svc = service(gateway);

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Timeout {
                step: ConnectStep::TokenExchange,
                after
            } if after == TOKEN_EXCHANGE_TIMEOUT
        ));
        assert_eq!(svc.gateway.authorization_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_authorization_create_times_out() {
        let mut gateway = FakeGateway::ok("tok1", "auth-123");
        gateway.authorization_delay = Some(Duration::from_secs(30));
        let svc = service(gateway);

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Timeout {
                step: ConnectStep::AuthorizationCreate,
                after
            } if after == AUTHORIZATION_CREATE_TIMEOUT
        ));
        assert_eq!(err.step(), ConnectStep::AuthorizationCreate);
        assert!(svc.store().all().await.is_empty());
    }

    /// Store whose writes take longer than the persistence deadline.
    #[derive(Default)]
    struct SlowStore {
        saved: AtomicUsize,
    }

    impl PendingAuthorizationStore for SlowStore {
        async fn save_pending(&self, _record: PendingAuthorization) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_persistence_times_out() {
        let svc = ConnectService::new(
            FakeGateway::ok("tok1", "auth-123"),
            test_signer(),
            SlowStore::default(),
            settings(),
        )
        .with_clock(Arc::new(FixedClock(fixed_now())));

        let err = svc.start(&UserId::new("user-42")).await.unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Timeout {
                step: ConnectStep::Persistence,
                after
            } if after == PERSIST_TIMEOUT
        ));
        assert_eq!(svc.store().saved.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_flows_get_distinct_states() {
        let svc = Arc::new(service(FakeGateway::ok("tok1", "auth-123")));
        let mut handles = Vec::new();
        for i in 0..16 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.start(&UserId::new(format!("user-{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let states: HashSet<_> = svc.store().all().await.into_iter().map(|r| r.state).collect();
        assert_eq!(states.len(), 16);
    }

    #[test]
    fn generated_tokens_are_distinct_and_24_bytes() {
        let rng = SystemRandom::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let token = generate_token(&rng).unwrap();
            assert_eq!(token.len(), 32);
            assert!(!token.contains('='));
            let decoded = Base64UrlUnpadded::decode_vec(&token).unwrap();
            assert_eq!(decoded.len(), STATE_NONCE_BYTES);
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn authorize_url_encodes_scope_with_plus() {
        let url = authorize_url(&settings(), "a.b.c").unwrap();
        assert_eq!(
            url,
            "https://sandbox-auth.example.com/oauth/authorize?request=a.b.c&response_type=code&client_id=client-abc&scope=openid+accounts"
        );
    }

    #[test]
    fn timeout_error_reports_its_step() {
        let err = ConnectError::Timeout {
            step: ConnectStep::Persistence,
            after: PERSIST_TIMEOUT,
        };
        assert_eq!(err.step(), ConnectStep::Persistence);
        assert_eq!(err.to_string(), "persistence timed out after 3s");
    }
}
