use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::password::{
    AuthenticateRequest, AuthenticateResponse, PasswordQuery, SetPasswordRequest,
    SetPasswordResponse,
};
use crate::dtos::{DeleteResponse, ExistsResponse};
use crate::utils::Password;
use crate::AppState;

pub async fn set_password(
    State(state): State<AppState>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<Json<SetPasswordResponse>, AppError> {
    let created = state
        .passwords
        .create_or_update(&req.namespace, req.identity, Password::new(req.password))
        .await?;
    Ok(Json(SetPasswordResponse { created }))
}

/// Always 200; a failed check is `authenticated: false`.
pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, AppError> {
    let authenticated = state
        .passwords
        .authenticate(&req.namespace, req.identity, Password::new(req.password))
        .await?;
    Ok(Json(AuthenticateResponse { authenticated }))
}

pub async fn password_exists(
    State(state): State<AppState>,
    Query(query): Query<PasswordQuery>,
) -> Result<Json<ExistsResponse>, AppError> {
    let exists = state
        .passwords
        .exists(&query.namespace, query.identity)
        .await?;
    Ok(Json(ExistsResponse { exists }))
}

pub async fn delete_password(
    State(state): State<AppState>,
    Query(query): Query<PasswordQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let existed = state
        .passwords
        .delete(&query.namespace, query.identity)
        .await?;
    Ok(Json(DeleteResponse { existed }))
}
