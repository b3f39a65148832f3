use serde::{Deserialize, Serialize};

use crate::models::AccountResponse;
use crate::services::Registration;
use crate::utils::Password;

/// Missing fields deserialize as empty so the identity service reports
/// them with its own message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl From<SignupRequest> for Registration {
    fn from(req: SignupRequest) -> Self {
        Registration {
            email: req.email,
            password: Password::new(req.password),
            first_name: req.first_name,
            last_name: req.last_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: AccountResponse,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub expires_in: i64,
    pub user: AccountResponse,
}
