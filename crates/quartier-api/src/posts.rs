//! Regular posts and 24-hour flash posts share one set of handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use quartier_db::queries::posts::PostKind;
use quartier_types::api::{DeletedResponse, Page, Post, PostRequest, UpdatePostRequest};
use quartier_types::rules::{FLASH_POST_LIFETIME, PageQuery, require_text};

use crate::error::{ApiError, ApiResult};
use crate::guards::{ensure_allowed, ensure_author_or_staff, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const TITLE_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 5000;

fn permission(kind: PostKind) -> &'static str {
    match kind {
        PostKind::Regular => "publish_post",
        PostKind::Flash => "publish_flash_post",
    }
}

fn default_limit(kind: PostKind) -> u32 {
    match kind {
        PostKind::Regular => 10,
        PostKind::Flash => 5,
    }
}

async fn list(state: AppState, kind: PostKind, me: CurrentUser, query: PageQuery) -> ApiResult<Json<Page<Post>>> {
    let paging = query.resolve(default_limit(kind));
    let scope = scope_for(&me.0);
    let (posts, total) = state
        .run(move |db| db.list_posts(kind, scope.as_deref(), paging, Utc::now()))
        .await?;
    Ok(Json(Page::new(posts, total, paging)))
}

async fn load(state: &AppState, kind: PostKind, id: Uuid) -> ApiResult<Post> {
    let post = state
        .run(move |db| db.get_post(kind, id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    // Expired flash posts linger until the hourly purge
    if post.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err(ApiError::not_found("Post not found"));
    }
    Ok(post)
}

async fn get(state: AppState, kind: PostKind, me: CurrentUser, id: Uuid) -> ApiResult<Json<Post>> {
    let post = load(&state, kind, id).await?;
    ensure_same_iris(&me.0, &post.iris_code)?;
    Ok(Json(post))
}

async fn create(state: AppState, kind: PostKind, me: CurrentUser, req: PostRequest) -> ApiResult<(StatusCode, Json<Post>)> {
    let CurrentUser(me) = me;
    ensure_allowed(&state, &me, permission(kind)).await?;
    let title = require_text("title", &req.title, TITLE_MAX)?;
    let description = require_text("description", &req.description, DESCRIPTION_MAX)?;

    let now = Utc::now();
    let expires_at = match kind {
        PostKind::Regular => None,
        PostKind::Flash => Some(now + FLASH_POST_LIFETIME),
    };

    let post = state
        .run(move |db| {
            if kind == PostKind::Flash && db.has_live_flash_post(me.id, now)? {
                return Ok(None);
            }
            db.create_post(kind, &me, &title, &description, expires_at).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::bad_request("You already have an active flash post"))?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update(
    state: AppState,
    kind: PostKind,
    me: CurrentUser,
    id: Uuid,
    req: UpdatePostRequest,
) -> ApiResult<Json<Post>> {
    let post = load(&state, kind, id).await?;
    ensure_same_iris(&me.0, &post.iris_code)?;
    ensure_author_or_staff(&me.0, post.author.id)?;

    let title = req.title.as_deref().map(|v| require_text("title", v, TITLE_MAX)).transpose()?;
    let description = req
        .description
        .as_deref()
        .map(|v| require_text("description", v, DESCRIPTION_MAX))
        .transpose()?;

    let post = state
        .run(move |db| db.update_post(kind, id, title.as_deref(), description.as_deref()))
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    Ok(Json(post))
}

async fn delete(state: AppState, kind: PostKind, me: CurrentUser, id: Uuid) -> ApiResult<Json<DeletedResponse>> {
    let post = load(&state, kind, id).await?;
    ensure_same_iris(&me.0, &post.iris_code)?;
    ensure_author_or_staff(&me.0, post.author.id)?;
    let deleted = state.run(move |db| db.delete_post(kind, id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}

// -- /posts --

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Post>>> {
    list(state, PostKind::Regular, me, query).await
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Post>> {
    get(state, PostKind::Regular, me, id).await
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<PostRequest>,
) -> ApiResult<impl IntoResponse> {
    create(state, PostKind::Regular, me, req).await
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePostRequest>,
) -> ApiResult<Json<Post>> {
    update(state, PostKind::Regular, me, id, req).await
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    delete(state, PostKind::Regular, me, id).await
}

// -- /flashposts --

pub async fn list_flash_posts(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Post>>> {
    list(state, PostKind::Flash, me, query).await
}

pub async fn get_flash_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Post>> {
    get(state, PostKind::Flash, me, id).await
}

pub async fn create_flash_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<PostRequest>,
) -> ApiResult<impl IntoResponse> {
    create(state, PostKind::Flash, me, req).await
}

pub async fn update_flash_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePostRequest>,
) -> ApiResult<Json<Post>> {
    update(state, PostKind::Flash, me, id, req).await
}

pub async fn delete_flash_post(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    delete(state, PostKind::Flash, me, id).await
}
