//! Common test utilities for loyalty-service integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use loyalty_service::{
    build_router,
    config::{Environment, JwtConfig, LoyaltyConfig, SquareConfig, SquareEnvironment},
    models::{Account, AccountResponse},
    services::{
        AccountDirectory, IdGenerator, IdentityService, JwtService, LedgerBackend, LedgerService,
        Registration, RemoteError, RemoteEvent, RemoteEventKind, RemoteLedger,
    },
    utils::Password,
    AppState,
};
use secrecy::Secret;
use service_core::config::Config as CommonConfig;

pub const TEST_JWT_SECRET: &str = "test-secret";
pub const TEST_PASSWORD: &str = "password123";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,loyalty_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Deterministic ids: `acct-1`, `tx-1`, `LOY00000001`, ...
#[derive(Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn account_id(&self) -> String {
        format!("acct-{}", self.bump())
    }

    fn transaction_id(&self) -> String {
        format!("tx-{}", self.bump())
    }

    fn loyalty_code(&self) -> String {
        format!("LOY{:08}", self.bump())
    }
}

#[derive(Default)]
struct MockState {
    /// account id -> remote reference
    provisioned: HashMap<String, String>,
    balances: HashMap<String, i64>,
    /// Events per reference, in the order the mock returns them.
    events: HashMap<String, Vec<RemoteEvent>>,
    correlation_ids: Vec<String>,
    provision_calls: usize,
    next_event: u64,
}

/// In-memory remote ledger with injectable failures and latency.
#[derive(Default)]
pub struct MockRemoteLedger {
    state: Mutex<MockState>,
    failure: Mutex<Option<RemoteError>>,
    events_failure: Mutex<Option<RemoteError>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRemoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with `err` until cleared.
    pub fn fail_with(&self, err: RemoteError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Only `list_events` fails with `err` until cleared.
    pub fn fail_events_with(&self, err: RemoteError) {
        *self.events_failure.lock().unwrap() = Some(err);
    }

    pub fn clear_events_failure(&self) {
        *self.events_failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn correlation_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().correlation_ids.clone()
    }

    pub fn provision_calls(&self) -> usize {
        self.state.lock().unwrap().provision_calls
    }

    pub fn balance_of(&self, reference: &str) -> Option<i64> {
        self.state.lock().unwrap().balances.get(reference).copied()
    }

    pub fn set_balance(&self, reference: &str, points: i64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(reference.to_string(), points);
    }

    /// Append a raw event to a reference's history.
    pub fn push_event(&self, reference: &str, event: RemoteEvent) {
        self.state
            .lock()
            .unwrap()
            .events
            .entry(reference.to_string())
            .or_default()
            .push(event);
    }

    async fn before_call(&self) -> Result<(), RemoteError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record_event(
        state: &mut MockState,
        reference: &str,
        kind: RemoteEventKind,
        points: i64,
        description: Option<String>,
    ) -> String {
        state.next_event += 1;
        let event_id = format!("ev-{}", state.next_event);
        state
            .events
            .entry(reference.to_string())
            .or_default()
            .push(RemoteEvent {
                event_id: Some(event_id.clone()),
                kind,
                points,
                description,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            });
        event_id
    }
}

#[async_trait]
impl RemoteLedger for MockRemoteLedger {
    async fn ensure_account_provisioned(
        &self,
        account: &Account,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        self.before_call().await?;
        let mut state = self.state.lock().unwrap();
        state.provision_calls += 1;
        state.correlation_ids.push(correlation_id.to_string());

        let reference = state
            .provisioned
            .entry(account.id.clone())
            .or_insert_with(|| format!("sq-{}", account.id))
            .clone();
        state.balances.entry(reference.clone()).or_insert(0);
        Ok(reference)
    }

    async fn accumulate(
        &self,
        reference: &str,
        points: i64,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        self.before_call().await?;
        let mut state = self.state.lock().unwrap();
        state.correlation_ids.push(correlation_id.to_string());

        let balance = state
            .balances
            .get_mut(reference)
            .ok_or_else(|| RemoteError::Rejected("unknown loyalty account".to_string()))?;
        *balance += points;

        Ok(Self::record_event(
            &mut state,
            reference,
            RemoteEventKind::AccumulatePoints,
            points,
            None,
        ))
    }

    async fn adjust(
        &self,
        reference: &str,
        signed_points: i64,
        reason: &str,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        self.before_call().await?;
        let mut state = self.state.lock().unwrap();
        state.correlation_ids.push(correlation_id.to_string());

        let balance = state
            .balances
            .get_mut(reference)
            .ok_or_else(|| RemoteError::Rejected("unknown loyalty account".to_string()))?;
        if *balance + signed_points < 0 {
            return Err(RemoteError::Rejected("insufficient points".to_string()));
        }
        *balance += signed_points;

        Ok(Self::record_event(
            &mut state,
            reference,
            RemoteEventKind::AdjustPoints,
            signed_points,
            Some(reason.to_string()),
        ))
    }

    async fn get_balance(&self, reference: &str) -> Result<i64, RemoteError> {
        self.before_call().await?;
        self.balance_of(reference)
            .ok_or_else(|| RemoteError::Rejected("unknown loyalty account".to_string()))
    }

    fn list_events<'a>(
        &'a self,
        reference: &'a str,
        _limit: usize,
    ) -> BoxStream<'a, Result<RemoteEvent, RemoteError>> {
        // Returns the full history; bounding it is the caller's job.
        let events = self
            .state
            .lock()
            .unwrap()
            .events
            .get(reference)
            .cloned()
            .unwrap_or_default();

        let events_failure = self.events_failure.lock().unwrap().clone();

        stream::once(async move {
            self.before_call().await?;
            if let Some(err) = events_failure {
                return Err(err);
            }
            Ok::<_, RemoteError>(events)
        })
        .map_ok(|events| stream::iter(events.into_iter().map(Ok::<_, RemoteError>)))
        .try_flatten()
        .boxed()
    }
}

pub fn test_jwt() -> JwtService {
    JwtService::with_expiry(TEST_JWT_SECRET, chrono::Duration::hours(1))
}

/// Services sharing one directory, wired the way startup wires them.
pub struct TestServices {
    pub directory: Arc<AccountDirectory>,
    pub identity: IdentityService,
    pub ledger: Arc<LedgerService>,
}

pub fn fallback_services() -> TestServices {
    build_services(LedgerBackend::fallback())
}

pub fn remote_services(remote: Arc<MockRemoteLedger>) -> TestServices {
    build_services(LedgerBackend::remote(remote))
}

pub fn build_services(backend: LedgerBackend) -> TestServices {
    init_tracing();

    let directory = Arc::new(AccountDirectory::new());
    let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIdGenerator::default());
    let identity = IdentityService::new(directory.clone(), test_jwt(), ids.clone());
    let ledger = Arc::new(LedgerService::new(directory.clone(), backend, ids));

    TestServices {
        directory,
        identity,
        ledger,
    }
}

pub fn registration(email: &str) -> Registration {
    Registration {
        email: email.to_string(),
        password: Password::new(TEST_PASSWORD.to_string()),
        first_name: "Demo".to_string(),
        last_name: "User".to_string(),
    }
}

pub fn register(identity: &IdentityService, email: &str) -> AccountResponse {
    identity
        .register(registration(email))
        .expect("registration should succeed")
}

pub fn test_config() -> LoyaltyConfig {
    LoyaltyConfig {
        common: CommonConfig { port: 0 },
        environment: Environment::Dev,
        service_name: "loyalty-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        jwt: JwtConfig {
            secret: Secret::new(TEST_JWT_SECRET.to_string()),
            expiry_hours: 1,
        },
        square: SquareConfig {
            access_token: Secret::new(String::new()),
            location_id: String::new(),
            environment: SquareEnvironment::Sandbox,
            base_url: None,
            timeout_seconds: 5,
            retry_max_elapsed_seconds: 1,
        },
    }
}

/// Router over the given services, as served by the binary.
pub fn test_app(services: &TestServices) -> Router {
    build_router(AppState {
        config: test_config(),
        identity: services.identity.clone(),
        ledger: services.ledger.clone(),
    })
}
