use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::token::{
    CreateTokenRequest, LookupTokenRequest, RefreshTokenRequest, TokensForIdentityQuery,
    ValidateTokenRequest, ValidateTokenResponse,
};
use crate::dtos::{DeleteResponse, NamespaceQuery, RecordQuery};
use crate::models::{Page, RefreshOutcome, TokenData};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn create_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .tokens
        .create(&req.namespace, req.identity, req.scopes, req.metadata)
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Always 200; the verdict is in `status`.
pub async fn validate_token(
    State(state): State<AppState>,
    Json(req): Json<ValidateTokenRequest>,
) -> Result<Json<ValidateTokenResponse>, AppError> {
    let status = state.tokens.validate(&req.token, req.use_cache).await?;
    Ok(Json(ValidateTokenResponse { status }))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshOutcome>, AppError> {
    Ok(Json(state.tokens.refresh(&req.refresh_token).await?))
}

pub async fn lookup_token(
    State(state): State<AppState>,
    Json(req): Json<LookupTokenRequest>,
) -> Result<Json<TokenData>, AppError> {
    Ok(Json(state.tokens.raw_get(&req.token, req.use_cache).await?))
}

pub async fn get_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<TokenData>, AppError> {
    Ok(Json(
        state
            .tokens
            .get(&query.namespace, id, query.use_cache)
            .await?,
    ))
}

pub async fn disable_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<NamespaceQuery>,
) -> Result<StatusCode, AppError> {
    state.tokens.disable(&query.namespace, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let existed = state.tokens.delete(&query.namespace, id).await?;
    Ok(Json(DeleteResponse { existed }))
}

pub async fn tokens_for_identity(
    State(state): State<AppState>,
    Path(identity): Path<Uuid>,
    Query(query): Query<TokensForIdentityQuery>,
) -> Result<Json<Vec<TokenData>>, AppError> {
    let page = Page::new(query.skip, query.limit);
    Ok(Json(
        state
            .tokens
            .list_for_identity(&query.namespace, identity, query.active, page)
            .await?,
    ))
}
