use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::identity::{
    CreateIdentityRequest, ListIdentitiesQuery, MembershipRequest, ServiceManagedQuery,
    SetActiveRequest, UpdateIdentityRequest,
};
use crate::dtos::{DeleteResponse, ExistsResponse, NamespaceQuery, RecordQuery};
use crate::models::{Identity, Page};
use crate::services::CreateIdentity;
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn create_identity(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateIdentityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state
        .identities
        .create(CreateIdentity {
            namespace: req.namespace,
            name: req.name,
            active: req.active,
            managed: req.managed,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(identity)))
}

pub async fn list_identities(
    State(state): State<AppState>,
    Query(query): Query<ListIdentitiesQuery>,
) -> Result<Json<Vec<Identity>>, AppError> {
    let page = Page::new(query.skip, query.limit);
    Ok(Json(state.identities.list(&query.namespace, page).await?))
}

pub async fn get_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .get(&query.namespace, id, query.use_cache)
            .await?,
    ))
}

pub async fn identity_exists(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<ExistsResponse>, AppError> {
    let exists = state
        .identities
        .exists(&query.namespace, id, query.use_cache)
        .await?;
    Ok(Json(ExistsResponse { exists }))
}

pub async fn get_service_managed_identity(
    State(state): State<AppState>,
    Query(query): Query<ServiceManagedQuery>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .get_service_managed(&query.namespace, &query.service, &query.management_id)
            .await?,
    ))
}

pub async fn update_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateIdentityRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .update(&req.namespace, id, &req.name)
            .await?,
    ))
}

pub async fn set_identity_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SetActiveRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .set_active(&req.namespace, id, req.active)
            .await?,
    ))
}

pub async fn delete_identity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let existed = state.identities.delete(&query.namespace, id).await?;
    Ok(Json(DeleteResponse { existed }))
}

pub async fn add_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MembershipRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .add_policy(&req.namespace, id, req.reference())
            .await?,
    ))
}

pub async fn remove_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MembershipRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .remove_policy(&req.namespace, id, req.reference())
            .await?,
    ))
}

pub async fn add_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MembershipRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .add_role(&req.namespace, id, req.reference())
            .await?,
    ))
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MembershipRequest>,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(
        state
            .identities
            .remove_role(&req.namespace, id, req.reference())
            .await?,
    ))
}
