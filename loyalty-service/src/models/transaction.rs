//! Points transaction model for the fallback ledger and translated remote events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a points movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Earn,
    Redeem,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Redeem => "redeem",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable ledger entry. `points` is always positive; `kind` carries the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "userId")]
    pub account_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub points: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        id: String,
        account_id: String,
        kind: TransactionKind,
        points: i64,
        description: String,
    ) -> Self {
        Self {
            id,
            account_id,
            kind,
            points,
            description,
            created_at: Utc::now(),
        }
    }

    /// Signed effect on the balance.
    pub fn signed_points(&self) -> i64 {
        match self.kind {
            TransactionKind::Earn => self.points,
            TransactionKind::Redeem => -self.points,
        }
    }
}

/// Authoritative balance plus the history it was read with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub points: i64,
    pub transactions: Vec<Transaction>,
}
