//! Remote loyalty ledger boundary.
//!
//! The ledger service only talks to an external points ledger through the
//! [`RemoteLedger`] trait. Failures are split into transient
//! ([`RemoteError::Unavailable`]) and permanent ([`RemoteError::Rejected`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

use crate::models::{Account, Transaction, TransactionKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote ledger unavailable: {0}")]
    Unavailable(String),

    #[error("remote ledger rejected request: {0}")]
    Rejected(String),
}

/// Event kinds reported by the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEventKind {
    AccumulatePoints,
    AdjustPoints,
    CreateReward,
    Other(String),
}

impl RemoteEventKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "ACCUMULATE_POINTS" => Self::AccumulatePoints,
            "ADJUST_POINTS" => Self::AdjustPoints,
            "CREATE_REWARD" => Self::CreateReward,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One entry of the remote ledger's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub event_id: Option<String>,
    pub kind: RemoteEventKind,
    /// Signed for adjustments, a positive count otherwise.
    pub points: i64,
    pub description: Option<String>,
    /// RFC 3339 timestamp as reported remotely.
    pub timestamp: Option<String>,
}

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Create (or find) the remote account for `account` and return its reference.
    async fn ensure_account_provisioned(
        &self,
        account: &Account,
        correlation_id: &str,
    ) -> Result<String, RemoteError>;

    /// Credit points. Returns the remote event id.
    async fn accumulate(
        &self,
        reference: &str,
        points: i64,
        correlation_id: &str,
    ) -> Result<String, RemoteError>;

    /// Apply a signed delta. Returns the remote event id.
    async fn adjust(
        &self,
        reference: &str,
        signed_points: i64,
        reason: &str,
        correlation_id: &str,
    ) -> Result<String, RemoteError>;

    async fn get_balance(&self, reference: &str) -> Result<i64, RemoteError>;

    /// Lazily fetched history, at most `limit` items. Each call fetches anew.
    fn list_events<'a>(
        &'a self,
        reference: &'a str,
        limit: usize,
    ) -> BoxStream<'a, Result<RemoteEvent, RemoteError>>;
}

/// Translate a remote event into a local transaction.
///
/// Returns `None` for events without an id, unknown kinds and zero-point
/// adjustments. A missing or unparseable timestamp becomes `now`.
pub fn translate_event(
    event: &RemoteEvent,
    account_id: &str,
    now: DateTime<Utc>,
) -> Option<Transaction> {
    let id = event.event_id.as_deref().filter(|id| !id.is_empty())?;

    let (kind, points, description) = match &event.kind {
        RemoteEventKind::AccumulatePoints => (TransactionKind::Earn, event.points, "Points earned"),
        RemoteEventKind::AdjustPoints if event.points > 0 => (
            TransactionKind::Earn,
            event.points,
            "Points adjustment (earned)",
        ),
        RemoteEventKind::AdjustPoints if event.points < 0 => {
            (TransactionKind::Redeem, -event.points, "Points redeemed")
        }
        RemoteEventKind::AdjustPoints => return None,
        RemoteEventKind::CreateReward => (TransactionKind::Redeem, event.points, "Reward created"),
        RemoteEventKind::Other(_) => return None,
    };

    let created_at = event
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(now);

    Some(Transaction {
        id: id.to_string(),
        account_id: account_id.to_string(),
        kind,
        points,
        description: description.to_string(),
        created_at,
    })
}
