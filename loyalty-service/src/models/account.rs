//! Account model - a registered member and its cached loyalty state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account record owned by the account directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    /// Member code handed out at registration (`LOY` + 8 characters).
    pub loyalty_code: String,
    /// Account id on the remote loyalty ledger. Set once, never reassigned.
    pub remote_account_id: Option<String>,
    /// Local balance. Authoritative only in fallback mode.
    pub cached_points: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// Create a new account with a zero balance.
    pub fn new(
        id: String,
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        loyalty_code: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            password_hash,
            first_name,
            last_name,
            loyalty_code,
            remote_account_id: None,
            cached_points: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Copy of the account with the password hash cleared.
    pub fn sanitized(&self) -> AccountResponse {
        AccountResponse::from(self.clone())
    }

    pub fn touch(&mut self) {
        self.updated_utc = Utc::now();
    }
}

/// Account as returned to callers (no password material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub loyalty_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_account_id: Option<String>,
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            email: a.email,
            first_name: a.first_name,
            last_name: a.last_name,
            loyalty_id: a.loyalty_code,
            remote_account_id: a.remote_account_id,
            points: a.cached_points,
            created_at: a.created_utc,
            updated_at: a.updated_utc,
        }
    }
}
