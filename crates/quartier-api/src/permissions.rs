use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use quartier_types::api::{DeletedResponse, Permission, RestrictRequest, RestrictionStatus};
use quartier_types::rules::{require_text, restriction_expiry};

use crate::error::{ApiError, ApiResult};
use crate::guards::require_staff;
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// GET /permissions
pub async fn list_permissions(State(state): State<AppState>) -> ApiResult<Json<Vec<Permission>>> {
    Ok(Json(state.run(|db| db.list_permissions()).await?))
}

/// POST /permissions/{code}/restrict
pub async fn restrict(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<RestrictRequest>,
) -> ApiResult<impl IntoResponse> {
    require_staff(&me)?;
    let reason = require_text("reason", &req.reason, 500)?;
    let now = Utc::now();
    let expires_at = restriction_expiry(now, req.days, req.hours, req.minutes)?;

    enum Outcome {
        UnknownCode,
        UnknownUser,
        AlreadyRestricted,
        Created(quartier_types::api::Restriction),
    }

    let user_id = req.user_id;
    let by = me.id;
    let outcome = state
        .run(move |db| {
            if !db.permission_exists(&code)? {
                return Ok(Outcome::UnknownCode);
            }
            if !db.user_exists(user_id)? {
                return Ok(Outcome::UnknownUser);
            }
            if db.active_restriction(user_id, &code, now)?.is_some() {
                return Ok(Outcome::AlreadyRestricted);
            }
            db.create_restriction(user_id, &code, &reason, by, expires_at)
                .map(Outcome::Created)
        })
        .await?;

    match outcome {
        Outcome::UnknownCode => Err(ApiError::not_found("Unknown permission")),
        Outcome::UnknownUser => Err(ApiError::not_found("User not found")),
        Outcome::AlreadyRestricted => Err(ApiError::bad_request("This user is already restricted for this action")),
        Outcome::Created(restriction) => {
            info!(
                "{} restricted {} on {} until {}",
                by, restriction.user_id, restriction.permission_code, restriction.expires_at
            );
            Ok((StatusCode::CREATED, Json(restriction)))
        }
    }
}

/// DELETE /permissions/{code}/restrict/{user_id}
pub async fn unrestrict(
    State(state): State<AppState>,
    Path((code, user_id)): Path<(String, Uuid)>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<DeletedResponse>> {
    require_staff(&me)?;
    let removed = state.run(move |db| db.remove_restrictions(user_id, &code)).await?;
    if removed > 0 {
        info!("{} lifted {} restriction(s) on {}", me.id, removed, user_id);
    }
    Ok(Json(DeletedResponse { deleted: removed > 0 }))
}

/// GET /permissions/{code}/isRestricted
pub async fn is_restricted(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<RestrictionStatus>> {
    let user_id = me.id;
    let lookup = code.clone();
    let active = state
        .run(move |db| {
            let now = Utc::now();
            db.purge_expired_restrictions(now)?;
            db.active_restriction(user_id, &lookup, now)
        })
        .await?;
    Ok(Json(RestrictionStatus {
        code,
        restricted: active.is_some(),
        expires_at: active.map(|r| r.expires_at),
    }))
}
