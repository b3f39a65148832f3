//! In-memory account directory.
//!
//! Accounts are indexed by id and by email behind a single reader/writer
//! lock. Every call is synchronous and never awaits, so the lock is never
//! held across a remote call.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::Account;
use crate::services::ServiceError;

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Account>,
    /// email -> account id
    by_email: HashMap<String, String>,
}

/// Concurrency-safe store of accounts with unique emails.
#[derive(Default)]
pub struct AccountDirectory {
    inner: RwLock<Inner>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, ServiceError> {
        self.inner
            .read()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Account directory lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, ServiceError> {
        self.inner
            .write()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Account directory lock poisoned: {}", e)))
    }

    /// Store a new account. Fails with `AlreadyExists` if the email is taken.
    pub fn create(&self, account: Account) -> Result<(), ServiceError> {
        let mut inner = self.write()?;

        if inner.by_email.contains_key(&account.email) {
            return Err(ServiceError::AlreadyExists);
        }
        if inner.by_id.contains_key(&account.id) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Duplicate account id generated: {}",
                account.id
            )));
        }

        inner.by_email.insert(account.email.clone(), account.id.clone());
        inner.by_id.insert(account.id.clone(), account);
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Account, ServiceError> {
        self.read()?
            .by_id
            .get(id)
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Account, ServiceError> {
        let inner = self.read()?;
        inner
            .by_email
            .get(email)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    /// Replace the stored account with the same id.
    ///
    /// The email index follows an email change; moving onto an email owned by
    /// another account fails with `AlreadyExists`.
    pub fn update(&self, account: Account) -> Result<(), ServiceError> {
        let mut inner = self.write()?;
        Self::replace(&mut inner, account)
    }

    /// Apply `f` to the stored account under the write lock and return its
    /// result. Nothing is written back if `f` fails, so check-then-mutate
    /// sequences are atomic.
    pub fn modify<T, F>(&self, id: &str, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Account) -> Result<T, ServiceError>,
    {
        let mut inner = self.write()?;
        let mut account = inner.by_id.get(id).cloned().ok_or(ServiceError::NotFound)?;

        let out = f(&mut account)?;
        Self::replace(&mut inner, account)?;
        Ok(out)
    }

    /// Snapshot of every account. Diagnostics only.
    pub fn list_all(&self) -> Result<Vec<Account>, ServiceError> {
        Ok(self.read()?.by_id.values().cloned().collect())
    }

    fn replace(inner: &mut Inner, account: Account) -> Result<(), ServiceError> {
        let previous_email = match inner.by_id.get(&account.id) {
            Some(existing) => existing.email.clone(),
            None => return Err(ServiceError::NotFound),
        };

        if previous_email != account.email {
            if inner.by_email.contains_key(&account.email) {
                return Err(ServiceError::AlreadyExists);
            }
            inner.by_email.remove(&previous_email);
            inner.by_email.insert(account.email.clone(), account.id.clone());
        }

        inner.by_id.insert(account.id.clone(), account);
        Ok(())
    }
}
