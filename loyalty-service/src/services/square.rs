//! Square Loyalty client.
//!
//! Implements [`RemoteLedger`] over Square's Loyalty API. The HTTP client is
//! supplied by the caller. Every write carries the caller's correlation id as
//! the Square idempotency key, and transient failures are retried with
//! exponential backoff reusing that same key.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SquareConfig;
use crate::models::Account;
use crate::services::remote::{RemoteError, RemoteEvent, RemoteEventKind, RemoteLedger};

const SQUARE_VERSION: &str = "2024-01-18";
/// Largest page Square accepts for event search.
const EVENTS_PAGE_SIZE: usize = 30;

/// Square Loyalty client bound to one loyalty program.
#[derive(Clone)]
pub struct SquareLedger {
    client: Client,
    config: SquareConfig,
    program_id: String,
}

#[derive(Debug, Deserialize)]
struct ProgramResponse {
    program: Option<LoyaltyProgram>,
}

#[derive(Debug, Deserialize)]
struct LoyaltyProgram {
    id: String,
}

#[derive(Debug, Serialize)]
struct AccountMapping<'a> {
    phone_number: &'a str,
}

#[derive(Debug, Serialize)]
struct NewLoyaltyAccount<'a> {
    program_id: &'a str,
    mapping: AccountMapping<'a>,
}

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    loyalty_account: NewLoyaltyAccount<'a>,
    idempotency_key: &'a str,
}

#[derive(Debug, Serialize)]
struct SearchAccountsQuery<'a> {
    mappings: Vec<AccountMapping<'a>>,
}

#[derive(Debug, Serialize)]
struct SearchAccountsRequest<'a> {
    query: SearchAccountsQuery<'a>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct SearchAccountsResponse {
    #[serde(default)]
    loyalty_accounts: Vec<LoyaltyAccount>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    loyalty_account: Option<LoyaltyAccount>,
}

#[derive(Debug, Deserialize)]
struct LoyaltyAccount {
    id: String,
    #[serde(default)]
    balance: i64,
}

#[derive(Debug, Serialize)]
struct AccumulatePoints<'a> {
    loyalty_program_id: &'a str,
    points: i64,
}

#[derive(Debug, Serialize)]
struct AccumulateRequest<'a> {
    accumulate_points: AccumulatePoints<'a>,
    idempotency_key: &'a str,
    location_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AdjustPoints<'a> {
    loyalty_program_id: &'a str,
    points: i64,
    #[serde(skip_serializing_if = "str::is_empty")]
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct AdjustRequest<'a> {
    adjust_points: AdjustPoints<'a>,
    idempotency_key: &'a str,
}

/// Accumulate and adjust respond with either a single event or a list.
#[derive(Debug, Deserialize)]
struct EventWriteResponse {
    event: Option<SquareEvent>,
    #[serde(default)]
    events: Vec<SquareEvent>,
}

#[derive(Debug, Serialize)]
struct LoyaltyAccountFilter<'a> {
    loyalty_account_id: &'a str,
}

#[derive(Debug, Serialize)]
struct EventFilter<'a> {
    loyalty_account_filter: LoyaltyAccountFilter<'a>,
}

#[derive(Debug, Serialize)]
struct EventQuery<'a> {
    filter: EventFilter<'a>,
}

#[derive(Debug, Serialize)]
struct SearchEventsRequest<'a> {
    query: EventQuery<'a>,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchEventsResponse {
    #[serde(default)]
    events: Vec<SquareEvent>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SquareEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    created_at: Option<String>,
    accumulate_points: Option<PointsDetail>,
    adjust_points: Option<AdjustDetail>,
    create_reward: Option<PointsDetail>,
}

#[derive(Debug, Deserialize)]
struct PointsDetail {
    #[serde(default)]
    points: i64,
}

#[derive(Debug, Deserialize)]
struct AdjustDetail {
    #[serde(default)]
    points: i64,
    reason: Option<String>,
}

impl From<SquareEvent> for RemoteEvent {
    fn from(event: SquareEvent) -> Self {
        let kind = RemoteEventKind::parse(&event.kind);
        let (points, description) = match &kind {
            RemoteEventKind::AccumulatePoints => {
                (event.accumulate_points.map(|p| p.points).unwrap_or(0), None)
            }
            RemoteEventKind::AdjustPoints => event
                .adjust_points
                .map(|a| (a.points, a.reason))
                .unwrap_or((0, None)),
            RemoteEventKind::CreateReward => {
                (event.create_reward.map(|p| p.points).unwrap_or(0), None)
            }
            RemoteEventKind::Other(_) => (0, None),
        };

        RemoteEvent {
            event_id: event.id,
            kind,
            points,
            description,
            timestamp: event.created_at,
        }
    }
}

/// Square API error response.
#[derive(Debug, Deserialize)]
struct SquareErrorBody {
    #[serde(default)]
    errors: Vec<SquareErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SquareErrorDetail {
    code: String,
    detail: Option<String>,
}

impl SquareLedger {
    /// Resolve the main loyalty program. Any failure here means the remote
    /// ledger is not usable and the caller should run in fallback mode.
    pub async fn connect(client: Client, config: SquareConfig) -> Result<Self, RemoteError> {
        if !config.is_configured() {
            return Err(RemoteError::Rejected(
                "Square credentials not configured".to_string(),
            ));
        }

        let mut ledger = Self {
            client,
            config,
            program_id: String::new(),
        };

        let response: ProgramResponse = ledger
            .execute(Method::GET, "/v2/loyalty/programs/main", None::<&()>)
            .await?;
        let program = response
            .program
            .ok_or_else(|| RemoteError::Rejected("no loyalty program found".to_string()))?;

        tracing::info!(program_id = %program.id, "Square loyalty program resolved");
        ledger.program_id = program.id;
        Ok(ledger)
    }

    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    /// Square maps loyalty accounts to phone numbers. We derive a stable
    /// placeholder number from the account id so retries and re-checks map
    /// to the same remote account.
    fn phone_number_for(account_id: &str) -> String {
        let digest = Sha256::digest(account_id.as_bytes());
        let mut value = [0u8; 8];
        value.copy_from_slice(&digest[..8]);
        format!("+1555{:07}", u64::from_be_bytes(value) % 10_000_000)
    }

    async fn execute<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.config.retry_max_elapsed()),
            ..Default::default()
        };

        retry(policy, move || {
            let method = method.clone();
            async move {
                self.send_once(method, path, body).await.map_err(|e| match e {
                    RemoteError::Unavailable(_) => {
                        tracing::debug!(path, error = %e, "Retrying Square request");
                        backoff::Error::transient(e)
                    }
                    RemoteError::Rejected(_) => backoff::Error::permanent(e),
                })
            }
        })
        .await
    }

    async fn send_once<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url(), path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(self.config.access_token.expose_secret())
            .header("Square-Version", SQUARE_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Square request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Failed to read Square response: {}", e)))?;

        tracing::debug!(status = %status, path, "Square response");

        if status.is_success() {
            // The write may have been applied; a retry under the same
            // idempotency key is safe.
            return serde_json::from_str(&text).map_err(|e| {
                RemoteError::Unavailable(format!("Unexpected Square response: {}", e))
            });
        }

        let detail = serde_json::from_str::<SquareErrorBody>(&text)
            .ok()
            .and_then(|body| body.errors.into_iter().next())
            .map(|e| format!("{} - {}", e.code, e.detail.unwrap_or_default()))
            .unwrap_or(text);

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(RemoteError::Unavailable(format!("Square {}: {}", status, detail)))
        } else {
            tracing::error!(status = %status, path, detail = %detail, "Square request rejected");
            Err(RemoteError::Rejected(format!("Square {}: {}", status, detail)))
        }
    }

    async fn find_account_by_phone(&self, phone_number: &str) -> Result<Option<String>, RemoteError> {
        let request = SearchAccountsRequest {
            query: SearchAccountsQuery {
                mappings: vec![AccountMapping { phone_number }],
            },
            limit: 1,
        };
        let response: SearchAccountsResponse = self
            .execute(Method::POST, "/v2/loyalty/accounts/search", Some(&request))
            .await?;
        Ok(response.loyalty_accounts.into_iter().next().map(|a| a.id))
    }

    /// One page of events, plus the paging state for the next call.
    async fn next_page(
        &self,
        reference: &str,
        state: Option<(Option<String>, usize)>,
    ) -> Result<Option<(Vec<RemoteEvent>, Option<(Option<String>, usize)>)>, RemoteError> {
        let Some((cursor, remaining)) = state else {
            return Ok(None);
        };
        if remaining == 0 {
            return Ok(None);
        }

        let request = SearchEventsRequest {
            query: EventQuery {
                filter: EventFilter {
                    loyalty_account_filter: LoyaltyAccountFilter {
                        loyalty_account_id: reference,
                    },
                },
            },
            limit: remaining.min(EVENTS_PAGE_SIZE),
            cursor: cursor.as_deref(),
        };
        let page: SearchEventsResponse = self
            .execute(Method::POST, "/v2/loyalty/events/search", Some(&request))
            .await?;

        let fetched = page.events.len();
        let next = match page.cursor {
            Some(cursor) if fetched > 0 && fetched < remaining => {
                Some((Some(cursor), remaining - fetched))
            }
            _ => None,
        };

        let events = page.events.into_iter().map(RemoteEvent::from).collect();
        Ok(Some((events, next)))
    }
}

fn first_event_id(response: EventWriteResponse) -> Result<String, RemoteError> {
    response
        .event
        .into_iter()
        .chain(response.events)
        .find_map(|e| e.id)
        .ok_or_else(|| RemoteError::Unavailable("no loyalty event returned from Square".to_string()))
}

#[async_trait]
impl RemoteLedger for SquareLedger {
    async fn ensure_account_provisioned(
        &self,
        account: &Account,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        let phone_number = Self::phone_number_for(&account.id);

        if let Some(existing) = self.find_account_by_phone(&phone_number).await? {
            tracing::debug!(account_id = %account.id, "Square loyalty account already exists");
            return Ok(existing);
        }

        let request = CreateAccountRequest {
            loyalty_account: NewLoyaltyAccount {
                program_id: &self.program_id,
                mapping: AccountMapping {
                    phone_number: &phone_number,
                },
            },
            idempotency_key: correlation_id,
        };
        let response: AccountResponse = self
            .execute(Method::POST, "/v2/loyalty/accounts", Some(&request))
            .await?;

        let created = response.loyalty_account.ok_or_else(|| {
            RemoteError::Unavailable("no loyalty account returned from Square".to_string())
        })?;
        tracing::info!(account_id = %account.id, loyalty_account_id = %created.id, "Square loyalty account created");
        Ok(created.id)
    }

    async fn accumulate(
        &self,
        reference: &str,
        points: i64,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        let request = AccumulateRequest {
            accumulate_points: AccumulatePoints {
                loyalty_program_id: &self.program_id,
                points,
            },
            idempotency_key: correlation_id,
            location_id: &self.config.location_id,
        };
        let path = format!("/v2/loyalty/accounts/{}/accumulate", reference);
        let response: EventWriteResponse = self.execute(Method::POST, &path, Some(&request)).await?;
        first_event_id(response)
    }

    async fn adjust(
        &self,
        reference: &str,
        signed_points: i64,
        reason: &str,
        correlation_id: &str,
    ) -> Result<String, RemoteError> {
        let request = AdjustRequest {
            adjust_points: AdjustPoints {
                loyalty_program_id: &self.program_id,
                points: signed_points,
                reason,
            },
            idempotency_key: correlation_id,
        };
        let path = format!("/v2/loyalty/accounts/{}/adjust", reference);
        let response: EventWriteResponse = self.execute(Method::POST, &path, Some(&request)).await?;
        first_event_id(response)
    }

    async fn get_balance(&self, reference: &str) -> Result<i64, RemoteError> {
        let path = format!("/v2/loyalty/accounts/{}", reference);
        let response: AccountResponse = self.execute(Method::GET, &path, None::<&()>).await?;
        response
            .loyalty_account
            .map(|a| a.balance)
            .ok_or_else(|| RemoteError::Rejected("no loyalty account found".to_string()))
    }

    fn list_events<'a>(
        &'a self,
        reference: &'a str,
        limit: usize,
    ) -> BoxStream<'a, Result<RemoteEvent, RemoteError>> {
        stream::try_unfold(Some((None, limit)), move |state| self.next_page(reference, state))
            .map_ok(|events: Vec<RemoteEvent>| stream::iter(events.into_iter().map(Ok::<_, RemoteError>)))
            .try_flatten()
            .boxed()
    }
}
