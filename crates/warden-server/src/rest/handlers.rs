use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use warden_client::{PermissionChecker, RelationManager};
use warden_core::tuple::{PermissionCheck, PermissionResult, RelationTuple};

use crate::directory::UserDirectory;
use crate::error::ApiError;
use crate::middleware::{CallingService, UserSubject};

use super::types::*;
use super::{AppState, MAX_BATCH_SIZE};

fn check_batch_size(len: usize) -> Result<(), ApiError> {
    if len > MAX_BATCH_SIZE {
        return Err(ApiError::RequestInvalid(format!(
            "at most {MAX_BATCH_SIZE} entries per request, got {len}"
        )));
    }
    Ok(())
}

pub async fn check_permission<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(UserSubject(subject)): Extension<UserSubject>,
    payload: Result<Json<PublicCheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    let allowed = state.public_checks.execute(&subject, req.into()).await?;
    Ok(Json(CheckResponse { allowed }))
}

pub async fn my_claims<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(UserSubject(subject)): Extension<UserSubject>,
) -> Result<Json<ClaimsResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let claims = state
        .roles
        .claims_for_subject(&subject, &state.request_token())
        .await;

    if let Some(err) = claims.error() {
        return Err(ApiError::unavailable(format!(
            "claims for '{subject}' unavailable: {err}"
        )));
    }
    Ok(Json(ClaimsResponse::from(&claims)))
}

pub async fn update_roles<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(UserSubject(actor)): Extension<UserSubject>,
    Path(target): Path<String>,
    payload: Result<Json<RoleChangeRequest>, JsonRejection>,
) -> Result<Json<ClaimsResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    let claims = state
        .role_updates
        .update(&actor, &target, req.into(), &state.request_token())
        .await?;
    Ok(Json(ClaimsResponse::from(&claims)))
}

pub async fn internal_check<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(CallingService(caller)): Extension<CallingService>,
    payload: Result<Json<TupleRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    let check = PermissionCheck::try_from(req)?;
    tracing::debug!(%caller, %check, "internal permission check");

    let allowed = state.internal_checks.execute(check).await?;
    Ok(Json(CheckResponse { allowed }))
}

/// Entries whose subject cannot be parsed are answered in place; the others
/// go to the backend as one batch.
pub async fn batch_check<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(CallingService(caller)): Extension<CallingService>,
    payload: Result<Json<BatchCheckRequest>, JsonRejection>,
) -> Result<Json<BatchCheckResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    check_batch_size(req.checks.len())?;
    tracing::debug!(%caller, count = req.checks.len(), "internal batch check");

    let mut results: Vec<Option<BatchCheckResult>> = Vec::with_capacity(req.checks.len());
    let mut positions = Vec::new();
    let mut checks = Vec::new();

    for entry in req.checks {
        match PermissionCheck::try_from(entry) {
            Ok(check) => {
                positions.push(results.len());
                results.push(None);
                checks.push(check);
            }
            Err(e) => results.push(Some(BatchCheckResult {
                allowed: false,
                error: Some(ApiError::from(e).to_string()),
            })),
        }
    }

    let answered: Vec<PermissionResult> = state
        .internal_checks
        .execute_batch(checks, &state.request_token())
        .await;
    for (position, result) in positions.into_iter().zip(answered) {
        results[position] = Some(result.into());
    }

    Ok(Json(BatchCheckResponse {
        results: results.into_iter().flatten().collect(),
    }))
}

pub async fn create_relationship<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(CallingService(caller)): Extension<CallingService>,
    payload: Result<Json<TupleRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    let tuple = RelationTuple::try_from(req)?;
    state.writer.create(&caller, tuple).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_relationship<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(CallingService(caller)): Extension<CallingService>,
    payload: Result<Json<TupleRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    let tuple = RelationTuple::try_from(req)?;
    state.writer.delete(&caller, tuple).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_claims<B, D>(
    State(state): State<AppState<B, D>>,
    Extension(CallingService(caller)): Extension<CallingService>,
    payload: Result<Json<BulkClaimsRequest>, JsonRejection>,
) -> Result<Json<BulkClaimsResponse>, ApiError>
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let Json(req) = payload?;
    check_batch_size(req.subject_ids.len())?;
    tracing::debug!(%caller, count = req.subject_ids.len(), "bulk role claims");

    let claims = state
        .roles
        .claims_for_subjects(&req.subject_ids, &state.request_token())
        .await?;

    Ok(Json(BulkClaimsResponse {
        claims: claims
            .iter()
            .map(|(id, c)| (id.clone(), ClaimsResponse::from(c)))
            .collect(),
    }))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
