use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::shop::Purchase;
use quartier_types::api::{DeletedResponse, OwnedBadge, ShopBadge, SuccessResponse};
use quartier_types::rules::require_text;

use crate::error::{ApiError, ApiResult};
use crate::files::{Form, UploadKind};
use crate::guards::require_admin;
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// GET /shop/badges
pub async fn list_badges(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<ShopBadge>>> {
    let viewer = me.id;
    Ok(Json(state.run(move |db| db.list_shop_badges(viewer)).await?))
}

/// POST /shop/badges (multipart: `image`, `name`, `cost`, `available`)
pub async fn create_badge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let mut form = Form::read(multipart).await?;

    let name = require_text("name", form.text("name").unwrap_or_default(), 100)?;
    let cost: i64 = form
        .text("cost")
        .map(str::trim)
        .ok_or_else(|| ApiError::bad_request("cost is required"))?
        .parse()
        .map_err(|_| ApiError::bad_request("cost must be a whole number"))?;
    if cost < 0 {
        return Err(ApiError::bad_request("cost must be zero or more"));
    }
    let available = match form.text("available").map(str::trim) {
        None | Some("") | Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => return Err(ApiError::bad_request("available must be true or false")),
    };
    let file = form
        .take_file("image")
        .ok_or_else(|| ApiError::bad_request("An image file is required"))?;

    let url = state.uploads.save_image(UploadKind::Badges, &file).await?;
    let stored = url.clone();
    match state.run(move |db| db.create_badge(&name, &stored, cost, available)).await {
        Ok(badge) => {
            info!("Badge {} ({}) added to the shop", badge.name, badge.id);
            Ok((StatusCode::CREATED, Json(badge)))
        }
        Err(e) => {
            state.uploads.remove(&url).await;
            Err(e)
        }
    }
}

/// DELETE /shop/badges/{id}
pub async fn delete_badge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    require_admin(&me)?;
    let badge = state
        .run(move |db| db.get_badge(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Badge not found"))?;
    let deleted = state.run(move |db| db.delete_badge(id)).await?;
    if deleted {
        state.uploads.remove(&badge.image_url).await;
    }
    Ok(Json(DeletedResponse { deleted }))
}

/// GET /shop/user-badges
pub async fn user_badges(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<OwnedBadge>>> {
    let user_id = me.id;
    Ok(Json(state.run(move |db| db.badges_of(user_id)).await?))
}

/// POST /shop/buy/{badge_id}
pub async fn buy_badge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(badge_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    let user_id = me.id;
    match state.run(move |db| db.buy_badge(user_id, badge_id)).await? {
        Purchase::Bought => {
            info!("{} bought badge {}", user_id, badge_id);
            Ok(Json(SuccessResponse { success: true }))
        }
        Purchase::Unavailable => Err(ApiError::not_found("Badge not available")),
        Purchase::AlreadyOwned => Err(ApiError::bad_request("You already own this badge")),
        Purchase::NotEnoughPoints => Err(ApiError::bad_request("Not enough points")),
    }
}
