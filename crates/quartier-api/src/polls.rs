use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::polls::{NewPoll, VoteOutcome};
use quartier_types::api::{CreatePollRequest, DeletedResponse, Page, Poll, SuccessResponse, VoteRequest};
use quartier_types::models::ALL_IRIS;
use quartier_types::rules::{PageQuery, validate_ballot, validate_new_poll};

use crate::error::{ApiError, ApiResult};
use crate::guards::{ensure_allowed, ensure_author_or_staff, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Longest `autoCloseIn`, in hours
const MAX_AUTO_CLOSE_HOURS: u32 = 24 * 365;

async fn load_poll(state: &AppState, id: Uuid, viewer: Uuid) -> ApiResult<Poll> {
    state
        .run(move |db| db.get_poll(id, viewer, Utc::now()))
        .await?
        .ok_or_else(|| ApiError::not_found("Poll not found"))
}

/// GET /polls
pub async fn list_polls(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Poll>>> {
    let paging = query.resolve(5);
    let scope = scope_for(&me);
    let viewer = me.id;
    let (polls, total) = state
        .run(move |db| db.list_polls(scope.as_deref(), paging, viewer, Utc::now()))
        .await?;
    Ok(Json(Page::new(polls, total, paging)))
}

/// GET /polls/{id}
pub async fn get_poll(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Poll>> {
    let poll = load_poll(&state, id, me.id).await?;
    ensure_same_iris(&me, &poll.iris_code)?;
    Ok(Json(poll))
}

/// POST /polls
///
/// Polls authored by admins reach every neighborhood.
pub async fn create_poll(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "create_poll").await?;
    let (question, options, max_selections) =
        validate_new_poll(&req.question, &req.options, req.poll_type, req.max_selections)?;

    let closes_at = match req.auto_close_in {
        Some(0) => return Err(ApiError::bad_request("autoCloseIn must be at least one hour")),
        Some(hours) if hours > MAX_AUTO_CLOSE_HOURS => {
            return Err(ApiError::bad_request("autoCloseIn is too far in the future"));
        }
        Some(hours) => Some(Utc::now() + Duration::hours(hours as i64)),
        None => None,
    };

    let (iris_code, iris_name) = if me.role.is_admin() {
        (ALL_IRIS.to_string(), ALL_IRIS.to_string())
    } else {
        (me.iris_code.clone(), me.iris_name.clone())
    };
    let poll_type = req.poll_type;

    let poll = state
        .run(move |db| {
            db.create_poll(
                &me,
                &NewPoll {
                    question: &question,
                    poll_type,
                    options: &options,
                    max_selections,
                    closes_at,
                    iris_code: &iris_code,
                    iris_name: &iris_name,
                },
            )
        })
        .await?;
    info!("Poll {} created ({} options)", poll.id, poll.options.len());
    Ok((StatusCode::CREATED, Json(poll)))
}

/// POST /polls/{id}/vote
pub async fn vote(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<Json<Poll>> {
    if me.role.is_staff() {
        return Err(ApiError::forbidden("Moderators and admins cannot vote"));
    }
    let poll = load_poll(&state, id, me.id).await?;
    ensure_same_iris(&me, &poll.iris_code)?;
    if poll.closed {
        return Err(ApiError::bad_request("This poll is closed"));
    }
    if poll.has_voted {
        return Err(ApiError::bad_request("You have already voted"));
    }
    validate_ballot(poll.poll_type, poll.max_selections, &req.selected_options_ids)?;

    let user_id = me.id;
    let selected = req.selected_options_ids;
    match state.run(move |db| db.vote(id, user_id, &selected, Utc::now())).await? {
        VoteOutcome::Recorded(points) => {
            info!("{} voted on poll {} (+{} points)", user_id, id, points);
        }
        VoteOutcome::NotFound => return Err(ApiError::not_found("Poll not found")),
        VoteOutcome::Closed => return Err(ApiError::bad_request("This poll is closed")),
        VoteOutcome::AlreadyVoted => return Err(ApiError::bad_request("You have already voted")),
        VoteOutcome::UnknownOption => return Err(ApiError::not_found("Option not found")),
    }

    Ok(Json(load_poll(&state, id, user_id).await?))
}

/// POST /polls/{id}/close
pub async fn close_poll(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    let poll = load_poll(&state, id, me.id).await?;
    ensure_same_iris(&me, &poll.iris_code)?;
    ensure_author_or_staff(&me, poll.author.id)?;
    let success = state.run(move |db| db.close_poll(id)).await?;
    Ok(Json(SuccessResponse { success }))
}

/// DELETE /polls/{id}
pub async fn delete_poll(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let poll = load_poll(&state, id, me.id).await?;
    ensure_same_iris(&me, &poll.iris_code)?;
    ensure_author_or_staff(&me, poll.author.id)?;
    let deleted = state.run(move |db| db.delete_poll(id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}
