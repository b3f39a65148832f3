//! Points ledger.
//!
//! The backend is chosen once at construction and applies to every account:
//!
//! - **Remote**: the remote ledger owns balances and history. Locally we keep
//!   a mirror of our own writes and a best-effort cached balance, neither of
//!   which is read for authorization.
//! - **Fallback**: an in-process, append-only transaction log together with
//!   `Account::cached_points` is the source of truth.
//!
//! Lock order is always transaction log, then account directory. Remote
//! calls are made with no lock held and are bounded by a timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};

use crate::models::{Account, Balance, Transaction, TransactionKind};
use crate::services::metrics::{LEDGER_OPERATIONS_TOTAL, POINTS_TOTAL, REMOTE_CALL_DURATION};
use crate::services::remote::{translate_event, RemoteError, RemoteEvent, RemoteLedger};
use crate::services::{AccountDirectory, IdGenerator, ServiceError};

/// Events fetched to build the history attached to a balance.
pub const BALANCE_EVENT_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Append-only per-account transaction log.
#[derive(Default)]
pub struct TransactionLog {
    entries: RwLock<HashMap<String, Vec<Transaction>>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Transaction>>>, ServiceError> {
        self.entries
            .read()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Transaction log lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Transaction>>>, ServiceError> {
        self.entries
            .write()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Transaction log lock poisoned: {}", e)))
    }

    /// Copy of an account's entries in append order.
    pub fn list(&self, account_id: &str) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.read()?.get(account_id).cloned().unwrap_or_default())
    }
}

/// Where balances and history live. Selected once, never mixed per account.
pub enum LedgerBackend {
    Remote {
        adapter: Arc<dyn RemoteLedger>,
        mirror: TransactionLog,
    },
    Fallback(TransactionLog),
}

impl LedgerBackend {
    pub fn remote(adapter: Arc<dyn RemoteLedger>) -> Self {
        Self::Remote {
            adapter,
            mirror: TransactionLog::new(),
        }
    }

    pub fn fallback() -> Self {
        Self::Fallback(TransactionLog::new())
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Fallback(_) => "fallback",
        }
    }

    /// Local transaction records: the authoritative log in fallback mode,
    /// the mirror of our own writes in remote mode.
    pub fn local_log(&self) -> &TransactionLog {
        match self {
            Self::Remote { mirror, .. } => mirror,
            Self::Fallback(log) => log,
        }
    }
}

/// Earns, redeems and reports points for accounts in the directory.
pub struct LedgerService {
    directory: Arc<AccountDirectory>,
    backend: LedgerBackend,
    ids: Arc<dyn IdGenerator>,
    remote_timeout: Duration,
}

impl LedgerService {
    pub fn new(
        directory: Arc<AccountDirectory>,
        backend: LedgerBackend,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        tracing::info!(mode = backend.mode(), "Ledger service initialized");
        Self {
            directory,
            backend,
            ids,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn mode(&self) -> &'static str {
        self.backend.mode()
    }

    pub fn backend(&self) -> &LedgerBackend {
        &self.backend
    }

    pub async fn earn_points(
        &self,
        account_id: &str,
        points: i64,
        description: &str,
    ) -> Result<Transaction, ServiceError> {
        let result = self.earn(account_id, points, description).await;
        self.record("earn", TransactionKind::Earn, points, &result);
        result
    }

    pub async fn redeem_points(
        &self,
        account_id: &str,
        points: i64,
        description: &str,
    ) -> Result<Transaction, ServiceError> {
        let result = self.redeem(account_id, points, description).await;
        self.record("redeem", TransactionKind::Redeem, points, &result);
        result
    }

    /// Authoritative balance with recent history. In remote mode a failed
    /// history fetch yields the balance with an empty history.
    pub async fn get_balance(&self, account_id: &str) -> Result<Balance, ServiceError> {
        match &self.backend {
            LedgerBackend::Fallback(log) => {
                let entries = log.read()?;
                let account = self.directory.get_by_id(account_id)?;
                Ok(Balance {
                    points: account.cached_points,
                    transactions: entries.get(account_id).cloned().unwrap_or_default(),
                })
            }
            LedgerBackend::Remote { adapter, .. } => {
                let account = self.directory.get_by_id(account_id)?;
                let Some(reference) = account.remote_account_id.as_deref() else {
                    return Ok(Balance {
                        points: 0,
                        transactions: Vec::new(),
                    });
                };

                let points = self
                    .call_remote("get_balance", adapter.get_balance(reference))
                    .await?;
                let transactions = match self
                    .fetch_events(adapter.as_ref(), reference, BALANCE_EVENT_LIMIT)
                    .await
                {
                    Ok(events) => translate_all(&events, account_id),
                    Err(e) => {
                        tracing::warn!(account_id, error = %e, "Returning balance without history");
                        Vec::new()
                    }
                };

                Ok(Balance {
                    points,
                    transactions,
                })
            }
        }
    }

    /// Up to `limit` entries in the order the backend keeps them. The remote
    /// ledger is asked for at most `limit` events; the local log yields its
    /// most recent `limit` entries.
    pub async fn get_history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, ServiceError> {
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(ServiceError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }

        match &self.backend {
            LedgerBackend::Fallback(log) => {
                let entries = log.read()?;
                self.directory.get_by_id(account_id)?;
                let all = entries.get(account_id).map(Vec::as_slice).unwrap_or_default();
                Ok(all[all.len().saturating_sub(limit)..].to_vec())
            }
            LedgerBackend::Remote { adapter, .. } => {
                let account = self.directory.get_by_id(account_id)?;
                let Some(reference) = account.remote_account_id.as_deref() else {
                    return Ok(Vec::new());
                };

                let events = self.fetch_events(adapter.as_ref(), reference, limit).await?;
                Ok(translate_all(&events, account_id))
            }
        }
    }

    async fn earn(
        &self,
        account_id: &str,
        points: i64,
        description: &str,
    ) -> Result<Transaction, ServiceError> {
        validate_points(points)?;

        match &self.backend {
            LedgerBackend::Fallback(log) => {
                let tx = self.new_transaction(account_id, TransactionKind::Earn, points, description);
                self.apply_local(log, tx)
            }
            LedgerBackend::Remote { adapter, mirror } => {
                let account = self.directory.get_by_id(account_id)?;
                let tx_id = self.ids.transaction_id();
                let reference = self
                    .ensure_provisioned(adapter.as_ref(), &account, &tx_id)
                    .await?;

                let event_id = self
                    .call_remote(
                        "accumulate",
                        adapter.accumulate(&reference, points, &format!("earn-{}", tx_id)),
                    )
                    .await?;
                tracing::debug!(account_id, event_id = %event_id, "Remote points accumulated");

                let tx = Transaction::new(
                    tx_id,
                    account_id.to_string(),
                    TransactionKind::Earn,
                    points,
                    description.to_string(),
                );
                self.mirror(mirror, &tx);
                Ok(tx)
            }
        }
    }

    async fn redeem(
        &self,
        account_id: &str,
        points: i64,
        description: &str,
    ) -> Result<Transaction, ServiceError> {
        validate_points(points)?;

        match &self.backend {
            LedgerBackend::Fallback(log) => {
                let tx = self.new_transaction(account_id, TransactionKind::Redeem, points, description);
                self.apply_local(log, tx)
            }
            LedgerBackend::Remote { adapter, mirror } => {
                let account = self.directory.get_by_id(account_id)?;
                let tx_id = self.ids.transaction_id();
                let reference = self
                    .ensure_provisioned(adapter.as_ref(), &account, &tx_id)
                    .await?;

                let balance = self
                    .call_remote("get_balance", adapter.get_balance(&reference))
                    .await?;
                if balance < points {
                    return Err(ServiceError::InsufficientPoints);
                }

                let event_id = self
                    .call_remote(
                        "adjust",
                        adapter.adjust(&reference, -points, description, &format!("redeem-{}", tx_id)),
                    )
                    .await?;
                tracing::debug!(account_id, event_id = %event_id, "Remote points adjusted");

                let tx = Transaction::new(
                    tx_id,
                    account_id.to_string(),
                    TransactionKind::Redeem,
                    points,
                    description.to_string(),
                );
                self.mirror(mirror, &tx);
                Ok(tx)
            }
        }
    }

    fn new_transaction(
        &self,
        account_id: &str,
        kind: TransactionKind,
        points: i64,
        description: &str,
    ) -> Transaction {
        Transaction::new(
            self.ids.transaction_id(),
            account_id.to_string(),
            kind,
            points,
            description.to_string(),
        )
    }

    /// Fallback write. The log's write lock serializes every local mutation,
    /// and the balance check runs inside the same directory write as the
    /// deduction, so concurrent redemptions cannot both pass the check.
    fn apply_local(&self, log: &TransactionLog, tx: Transaction) -> Result<Transaction, ServiceError> {
        let mut entries = log.write()?;

        self.directory.modify(&tx.account_id, |account| {
            account.cached_points = match tx.kind {
                TransactionKind::Earn => account
                    .cached_points
                    .checked_add(tx.points)
                    .ok_or_else(|| ServiceError::InvalidInput("points balance overflow".to_string()))?,
                TransactionKind::Redeem if account.cached_points < tx.points => {
                    return Err(ServiceError::InsufficientPoints);
                }
                TransactionKind::Redeem => account.cached_points - tx.points,
            };
            account.touch();
            Ok(())
        })?;

        entries
            .entry(tx.account_id.clone())
            .or_default()
            .push(tx.clone());
        Ok(tx)
    }

    /// Remote-mode bookkeeping after a successful remote write. Failures are
    /// logged and never surfaced; the remote ledger already holds the truth.
    fn mirror(&self, mirror: &TransactionLog, tx: &Transaction) {
        let delta = tx.signed_points();
        if let Err(e) = self.directory.modify(&tx.account_id, |account| {
            account.cached_points = account.cached_points.saturating_add(delta).max(0);
            account.touch();
            Ok(())
        }) {
            tracing::warn!(account_id = %tx.account_id, error = %e, "Failed to update cached points");
        }

        match mirror.write() {
            Ok(mut entries) => entries
                .entry(tx.account_id.clone())
                .or_default()
                .push(tx.clone()),
            Err(e) => {
                tracing::warn!(account_id = %tx.account_id, error = %e, "Failed to mirror transaction")
            }
        }
    }

    /// Return the account's remote reference, provisioning it on first use.
    /// A reference, once stored, is never replaced.
    async fn ensure_provisioned(
        &self,
        adapter: &dyn RemoteLedger,
        account: &Account,
        tx_id: &str,
    ) -> Result<String, ServiceError> {
        if let Some(reference) = &account.remote_account_id {
            return Ok(reference.clone());
        }

        let reference = self
            .call_remote(
                "provision",
                adapter.ensure_account_provisioned(account, &format!("provision-{}", tx_id)),
            )
            .await?;

        let stored = self
            .directory
            .modify(&account.id, |stored| {
                if let Some(existing) = &stored.remote_account_id {
                    return Ok(existing.clone());
                }
                stored.remote_account_id = Some(reference.clone());
                stored.touch();
                Ok(reference.clone())
            })
            .map_err(lost_account)?;

        tracing::info!(account_id = %account.id, remote_account_id = %stored, "Remote loyalty account linked");
        Ok(stored)
    }

    async fn fetch_events(
        &self,
        adapter: &dyn RemoteLedger,
        reference: &str,
        limit: usize,
    ) -> Result<Vec<RemoteEvent>, ServiceError> {
        let events = adapter.list_events(reference, limit).take(limit).try_collect::<Vec<_>>();
        self.call_remote("list_events", events).await
    }

    async fn call_remote<T, F>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable(format!(
                "{} timed out after {:?}",
                operation, self.remote_timeout
            ))),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(RemoteError::Unavailable(_)) => "unavailable",
            Err(RemoteError::Rejected(_)) => "rejected",
        };
        REMOTE_CALL_DURATION
            .with_label_values(&[operation, status])
            .observe(start.elapsed().as_secs_f64());

        result.map_err(|e| {
            tracing::warn!(operation, error = %e, "Remote ledger call failed");
            ServiceError::from(e)
        })
    }

    fn record(
        &self,
        operation: &str,
        kind: TransactionKind,
        points: i64,
        result: &Result<Transaction, ServiceError>,
    ) {
        let mode = self.mode();
        match result {
            Ok(tx) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&[operation, mode, "ok"])
                    .inc();
                POINTS_TOTAL
                    .with_label_values(&[kind.as_str(), mode])
                    .inc_by(points as f64);
                tracing::info!(
                    account_id = %tx.account_id,
                    transaction_id = %tx.id,
                    kind = %kind,
                    points,
                    mode,
                    "Points {}",
                    if kind == TransactionKind::Earn { "earned" } else { "redeemed" }
                );
            }
            Err(e) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&[operation, mode, "error"])
                    .inc();
                tracing::info!(operation, mode, error = %e, "Ledger operation failed");
            }
        }
    }
}

fn validate_points(points: i64) -> Result<(), ServiceError> {
    if points <= 0 {
        return Err(ServiceError::InvalidInput(
            "points must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// The account existed a moment ago; losing it now is a bug, not a 404.
fn lost_account(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::NotFound => {
            ServiceError::Internal(anyhow::anyhow!("Account disappeared during update"))
        }
        other => other,
    }
}

fn translate_all(events: &[RemoteEvent], account_id: &str) -> Vec<Transaction> {
    let now = Utc::now();
    events
        .iter()
        .filter_map(|event| translate_event(event, account_id, now))
        .collect()
}
