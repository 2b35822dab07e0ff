use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::admin::{RotateSigningKeyRequest, RotateSigningKeyResponse};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn rotate_signing_key(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RotateSigningKeyRequest>,
) -> Result<Json<RotateSigningKeyResponse>, AppError> {
    let signer = state.tokens.signer();
    signer.rotate(&req.kid, req.secret.as_bytes(), req.retain_previous)?;

    Ok(Json(RotateSigningKeyResponse {
        active_kid: signer.active_key_id()?,
        key_ids: signer.key_ids()?,
    }))
}
