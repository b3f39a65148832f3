use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, LoginResponse, SignupRequest, SignupResponse},
    middleware::AuthUser,
    AppState,
};

/// Register a new account
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.identity.register(req.into())?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created successfully".to_string(),
            user,
        }),
    ))
}

/// Exchange credentials for a session token
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.identity.authenticate(&req.email, &req.password)?;

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token: session.token,
        expires_in: session.expires_in,
        user: session.account,
    }))
}

/// Profile of the authenticated caller
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state.identity.get_profile(&claims.sub)?;
    Ok(Json(user))
}
