use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::loyalty::{HistoryQuery, HistoryResponse, PointsRequest},
    middleware::AuthUser,
    AppState,
};

pub async fn earn_points(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(req): Json<PointsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .ledger
        .earn_points(&claims.sub, req.points, &req.description)
        .await?;
    Ok(Json(transaction))
}

pub async fn redeem_points(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(req): Json<PointsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .ledger
        .redeem_points(&claims.sub, req.points, &req.description)
        .await?;
    Ok(Json(transaction))
}

pub async fn get_balance(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.ledger.get_balance(&claims.sub).await?;
    Ok(Json(balance))
}

pub async fn get_history(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let transactions = state
        .ledger
        .get_history(&claims.sub, query.limit())
        .await?;
    Ok(Json(HistoryResponse::from(transactions)))
}
