use std::sync::Arc;

use once_cell::sync::Lazy;
use validator::Validate;

use crate::{
    models::{Account, AccountResponse},
    services::{
        metrics::AUTH_EVENTS_TOTAL, AccountDirectory, IdGenerator, JwtService, ServiceError,
        SessionClaims,
    },
    utils::{
        hash_password, validate_email_shape, validate_password_strength, validation_message,
        verify_password, Password, PasswordHashString,
    },
};

/// Verified in place of a real hash when the email is unknown, so both
/// failure paths pay for one Argon2 run.
static UNKNOWN_ACCOUNT_HASH: Lazy<Option<PasswordHashString>> =
    Lazy::new(|| hash_password(&Password::new("unknown-account".to_string())).ok());

/// Input for [`IdentityService::register`].
#[derive(Debug, Clone, Validate)]
pub struct Registration {
    #[validate(
        length(min = 1, code = "required", message = "all fields are required"),
        custom(function = "validate_email_shape")
    )]
    pub email: String,

    #[validate(custom(function = "validate_password_strength"))]
    pub password: Password,

    #[validate(length(min = 1, code = "required", message = "all fields are required"))]
    pub first_name: String,

    #[validate(length(min = 1, code = "required", message = "all fields are required"))]
    pub last_name: String,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_in: i64,
    pub account: AccountResponse,
}

/// Registration, login and session verification.
#[derive(Clone)]
pub struct IdentityService {
    directory: Arc<AccountDirectory>,
    jwt: JwtService,
    ids: Arc<dyn IdGenerator>,
}

impl IdentityService {
    pub fn new(directory: Arc<AccountDirectory>, jwt: JwtService, ids: Arc<dyn IdGenerator>) -> Self {
        Self { directory, jwt, ids }
    }

    pub fn register(&self, req: Registration) -> Result<AccountResponse, ServiceError> {
        let result = self.register_account(req);
        record_auth_event("register", &result);
        result
    }

    fn register_account(&self, req: Registration) -> Result<AccountResponse, ServiceError> {
        req.validate()
            .map_err(|e| ServiceError::InvalidInput(validation_message(&e)))?;

        match self.directory.get_by_email(&req.email) {
            Ok(_) => return Err(ServiceError::AlreadyExists),
            Err(ServiceError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let password_hash = hash_password(&req.password).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            ServiceError::Internal(e)
        })?;

        let account = Account::new(
            self.ids.account_id(),
            req.email,
            password_hash.into_string(),
            req.first_name,
            req.last_name,
            self.ids.loyalty_code(),
        );
        let response = account.sanitized();

        // A concurrent registration may have claimed the email since the lookup
        self.directory.create(account)?;

        tracing::info!(account_id = %response.id, "Account registered");
        Ok(response)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        let result = self.login(email, password);
        record_auth_event("login", &result);
        result
    }

    fn login(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        if email.is_empty() || password.is_empty() {
            return Err(ServiceError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        let account = match self.directory.get_by_email(email) {
            Ok(account) => Some(account),
            Err(ServiceError::NotFound) => None,
            Err(e) => return Err(e),
        };

        let stored = account.as_ref().map(|a| a.password_hash.as_str());
        let account = match (credentials_match(stored, password), account) {
            (true, Some(account)) => account,
            _ => {
                tracing::debug!("Credential check failed");
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let token = self.jwt.generate_token(&account.id, &account.email).map_err(|e| {
            tracing::error!(error = %e, "Token signing failed");
            ServiceError::Internal(e)
        })?;

        tracing::info!(account_id = %account.id, "Account logged in");
        Ok(Session {
            token,
            expires_in: self.jwt.expiry_seconds(),
            account: account.sanitized(),
        })
    }

    /// Expired, malformed and badly signed tokens all yield `InvalidToken`.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let result = self.jwt.validate_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            ServiceError::InvalidToken
        });
        record_auth_event("session", &result);
        result
    }

    pub fn get_profile(&self, account_id: &str) -> Result<AccountResponse, ServiceError> {
        Ok(self.directory.get_by_id(account_id)?.sanitized())
    }

    /// Every registered account, sanitized. Diagnostics only.
    pub fn list_accounts(&self) -> Result<Vec<AccountResponse>, ServiceError> {
        Ok(self
            .directory
            .list_all()?
            .iter()
            .map(Account::sanitized)
            .collect())
    }
}

/// Argon2 runs whether or not an account was found. A missing account never matches.
fn credentials_match(stored: Option<&str>, password: &str) -> bool {
    let password = Password::new(password.to_string());
    match stored {
        Some(hash) => matches!(verify_password(&password, &PasswordHashString::from(hash)), Ok(true)),
        None => {
            if let Some(placeholder) = UNKNOWN_ACCOUNT_HASH.as_ref() {
                let _ = verify_password(&password, placeholder);
            }
            false
        }
    }
}

fn record_auth_event<T>(event: &str, result: &Result<T, ServiceError>) {
    let status = match result {
        Ok(_) => "success",
        Err(ServiceError::InvalidInput(_)) => "invalid_input",
        Err(ServiceError::AlreadyExists) => "conflict",
        Err(ServiceError::InvalidCredentials) | Err(ServiceError::InvalidToken) => "rejected",
        Err(_) => "error",
    };
    AUTH_EVENTS_TOTAL.with_label_values(&[event, status]).inc();
}
