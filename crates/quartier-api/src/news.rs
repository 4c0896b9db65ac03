use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::news::{NewNews, NewsChanges};
use quartier_types::api::{
    Comment, CommentRequest, CreateNewsRequest, DeletedResponse, LikeResponse, LikesSummary, News, Page,
    UpdateNewsRequest, UploadedUrls, ValidateNewsRequest,
};
use quartier_types::models::NewsStatus;
use quartier_types::rules::{PageQuery, optional_text, require_text, require_unique};

use crate::error::{ApiError, ApiResult};
use crate::files::{Form, UploadKind};
use crate::guards::{ensure_allowed, ensure_author_or_staff, ensure_same_iris, require_staff, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const TITLE_MAX: usize = 200;
const CONTENT_MAX: usize = 20_000;
const COMMENT_MAX: usize = 2000;

fn clean_tags(tags: &[String]) -> ApiResult<Vec<String>> {
    let tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    require_unique("tags", &tags)?;
    Ok(tags)
}

async fn load_news(state: &AppState, id: Uuid) -> ApiResult<News> {
    state
        .run(move |db| db.get_news(id))
        .await?
        .ok_or_else(|| ApiError::not_found("News not found"))
}

/// GET /news
pub async fn list_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<News>>> {
    let paging = query.resolve(5);
    let scope = scope_for(&me);
    let (news, total) = state.run(move |db| db.list_news(scope.as_deref(), paging)).await?;
    Ok(Json(Page::new(news, total, paging)))
}

/// GET /news/{id}
pub async fn get_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<News>> {
    let news = load_news(&state, id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    Ok(Json(news))
}

/// POST /news
pub async fn create_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<CreateNewsRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "publish_news").await?;
    let title = require_text("title", &req.title, TITLE_MAX)?;
    let content = require_text("content", &req.content, CONTENT_MAX)?;
    let tags = clean_tags(&req.tags)?;
    require_unique("images", &req.images)?;
    let images = req.images;
    let published = req.published;

    let news = state
        .run(move |db| {
            db.create_news(
                &me,
                &NewNews {
                    title: &title,
                    content: &content,
                    tags: &tags,
                    images: &images,
                    published,
                },
            )
        })
        .await?;
    info!("News {} submitted for review", news.id);
    Ok((StatusCode::CREATED, Json(news)))
}

/// PATCH /news/{id}
///
/// Any edit sends the news back to review.
pub async fn update_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateNewsRequest>,
) -> ApiResult<Json<News>> {
    let news = load_news(&state, id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    ensure_author_or_staff(&me, news.author.id)?;

    if let Some(images) = &req.images {
        require_unique("images", images)?;
    }
    let changes = NewsChanges {
        title: req.title.as_deref().map(|v| require_text("title", v, TITLE_MAX)).transpose()?,
        content: req.content.as_deref().map(|v| require_text("content", v, CONTENT_MAX)).transpose()?,
        tags: req.tags.as_deref().map(clean_tags).transpose()?,
        images: req.images,
        published: req.published,
    };

    let news = state
        .run(move |db| db.update_news(id, &changes))
        .await?
        .ok_or_else(|| ApiError::not_found("News not found"))?;
    Ok(Json(news))
}

/// DELETE /news/{id}
pub async fn delete_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let news = load_news(&state, id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    ensure_author_or_staff(&me, news.author.id)?;
    let deleted = state.run(move |db| db.delete_news(id)).await?;
    for image in &news.images {
        state.uploads.remove(image).await;
    }
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /news/{id}/like
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeResponse>> {
    let news = load_news(&state, id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    let (liked, total_likes) = state.run(move |db| db.toggle_news_like(id, me.id)).await?;
    Ok(Json(LikeResponse { liked, total_likes }))
}

/// GET /news/{id}/likes
pub async fn likes(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikesSummary>> {
    load_news(&state, id).await?;
    let (total_likes, liked) = state.run(move |db| db.news_likes(id, me.id)).await?;
    Ok(Json(LikesSummary { total_likes, liked }))
}

/// PATCH /news/{id}/validate
pub async fn validate_news(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidateNewsRequest>,
) -> ApiResult<Json<News>> {
    require_staff(&me)?;
    let news = load_news(&state, id).await?;
    ensure_same_iris(&me, &news.iris_code)?;

    let (status, reason) = if req.validated {
        (NewsStatus::Approved, None)
    } else {
        let reason = optional_text("rejectedReason", req.rejected_reason.as_deref(), 500)?
            .ok_or_else(|| ApiError::bad_request("A reason is required to reject a news"))?;
        (NewsStatus::Rejected, Some(reason))
    };

    let news = state
        .run(move |db| db.set_news_status(id, status, reason.as_deref()))
        .await?
        .ok_or_else(|| ApiError::not_found("News not found"))?;
    info!("{} marked news {} as {}", me.id, id, status);
    Ok(Json(news))
}

/// POST /news/upload-images
pub async fn upload_images(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<UploadedUrls>> {
    let form = Form::read(multipart).await?;
    let urls = state.uploads.save_images(UploadKind::News, &form.files).await?;
    Ok(Json(UploadedUrls { urls }))
}

// -- Comments --

async fn load_comment(state: &AppState, news_id: Uuid, id: Uuid) -> ApiResult<Comment> {
    state
        .run(move |db| db.get_comment(id))
        .await?
        .filter(|c| c.news_id == news_id)
        .ok_or_else(|| ApiError::not_found("Comment not found"))
}

/// GET /news/{id}/comments
pub async fn list_comments(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(news_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Comment>>> {
    let news = load_news(&state, news_id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    Ok(Json(state.run(move |db| db.list_comments(news_id)).await?))
}

/// POST /news/{id}/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(news_id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = require_text("content", &req.content, COMMENT_MAX)?;
    let news = load_news(&state, news_id).await?;
    ensure_same_iris(&me, &news.iris_code)?;
    let comment = state.run(move |db| db.create_comment(news_id, &me, &content)).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// PATCH /news/{id}/comments/{comment_id}
pub async fn update_comment(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path((news_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<Json<Comment>> {
    let comment = load_comment(&state, news_id, id).await?;
    ensure_same_iris(&me, &comment.iris_code)?;
    if comment.author.id != me.id {
        return Err(ApiError::forbidden("Only the author can edit this comment"));
    }
    let content = require_text("content", &req.content, COMMENT_MAX)?;
    let comment = state
        .run(move |db| db.update_comment(id, &content))
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    Ok(Json(comment))
}

/// DELETE /news/{id}/comments/{comment_id}
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path((news_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DeletedResponse>> {
    let comment = load_comment(&state, news_id, id).await?;
    ensure_same_iris(&me, &comment.iris_code)?;
    ensure_author_or_staff(&me, comment.author.id)?;
    let deleted = state.run(move |db| db.delete_comment(id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /news/{id}/comments/{comment_id}/like
pub async fn toggle_comment_like(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path((news_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<LikeResponse>> {
    let comment = load_comment(&state, news_id, id).await?;
    ensure_same_iris(&me, &comment.iris_code)?;
    let (liked, total_likes) = state.run(move |db| db.toggle_comment_like(id, me.id)).await?;
    Ok(Json(LikeResponse { liked, total_likes }))
}
