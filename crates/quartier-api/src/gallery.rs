use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use quartier_types::api::{DeletedResponse, GalleryItem, LikeResponse, Page};
use quartier_types::rules::{PageQuery, optional_text};

use crate::error::{ApiError, ApiResult};
use crate::files::{Form, UploadKind};
use crate::guards::{ensure_allowed, ensure_author_or_admin, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

async fn load_item(state: &AppState, id: Uuid, viewer: Uuid) -> ApiResult<GalleryItem> {
    state
        .run(move |db| db.get_gallery_item(id, viewer))
        .await?
        .ok_or_else(|| ApiError::not_found("Picture not found"))
}

/// GET /gallery
pub async fn list_gallery(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<GalleryItem>>> {
    let paging = query.resolve(30);
    let scope = scope_for(&me);
    let viewer = me.id;
    let (items, total) = state
        .run(move |db| db.list_gallery(scope.as_deref(), paging, viewer))
        .await?;
    Ok(Json(Page::new(items, total, paging)))
}

/// GET /gallery/{id}
pub async fn get_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GalleryItem>> {
    let item = load_item(&state, id, me.id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    Ok(Json(item))
}

/// POST /gallery (multipart: `image`, optional `description`)
pub async fn create_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "publish_gallery").await?;
    let mut form = Form::read(multipart).await?;
    let description = optional_text("description", form.text("description"), 500)?;
    let file = form
        .take_file("image")
        .ok_or_else(|| ApiError::bad_request("An image file is required"))?;

    let url = state.uploads.save_image(UploadKind::Gallery, &file).await?;
    let stored = url.clone();
    let created = state
        .run(move |db| db.create_gallery_item(&me, &stored, description.as_deref()))
        .await;
    match created {
        Ok(item) => Ok((StatusCode::CREATED, Json(item))),
        Err(e) => {
            state.uploads.remove(&url).await;
            Err(e)
        }
    }
}

/// POST /gallery/{id}/like
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeResponse>> {
    let item = load_item(&state, id, me.id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    let user_id = me.id;
    let (liked, total_likes) = state.run(move |db| db.toggle_gallery_like(id, user_id)).await?;
    Ok(Json(LikeResponse { liked, total_likes }))
}

/// DELETE /gallery/{id}
pub async fn delete_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let item = load_item(&state, id, me.id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    ensure_author_or_admin(&me, item.author.id)?;
    let deleted = state.run(move |db| db.delete_gallery_item(id)).await?;
    if deleted {
        state.uploads.remove(&item.url).await;
    }
    Ok(Json(DeletedResponse { deleted }))
}
