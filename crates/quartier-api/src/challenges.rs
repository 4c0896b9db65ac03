use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::challenges::{ChallengeChanges, NewChallenge, Review, Subscription};
use quartier_types::api::{
    Challenge, ChallengeCompletion, ChallengeDetail, ChallengeRequest, CompleteChallengeRequest, DeletedResponse,
    Page, ReviewCompletionRequest, SuccessResponse, UpdateChallengeRequest,
};
use quartier_types::rules::{PageQuery, optional_text, require_text, validate_date_range};

use crate::error::{ApiError, ApiResult};
use crate::guards::{ensure_allowed, ensure_author_or_admin, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const TITLE_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 10_000;
const CRITERIA_MAX: usize = 500;
const COMPLETION_TEXT_MAX: usize = 2000;
const IMAGE_URL_MAX: usize = 300;

async fn load_challenge(state: &AppState, id: Uuid) -> ApiResult<Challenge> {
    state
        .run(move |db| db.get_challenge(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Challenge not found"))
}

/// GET /challenges
///
/// Active only, latest end date first.
pub async fn list_challenges(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Challenge>>> {
    let paging = query.resolve(10);
    let scope = scope_for(&me);
    let (challenges, total) = state
        .run(move |db| db.list_active_challenges(scope.as_deref(), paging, Utc::now()))
        .await?;
    Ok(Json(Page::new(challenges, total, paging)))
}

/// GET /challenges/{id}
pub async fn get_challenge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ChallengeDetail>> {
    let detail = state
        .run(move |db| db.get_challenge_detail(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Challenge not found"))?;
    ensure_same_iris(&me, &detail.challenge.iris_code)?;
    Ok(Json(detail))
}

/// POST /challenges
pub async fn create_challenge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "create_challenge").await?;
    let title = require_text("title", &req.title, TITLE_MAX)?;
    let description = require_text("description", &req.description, DESCRIPTION_MAX)?;
    let success_criteria = require_text("successCriteria", &req.success_criteria, CRITERIA_MAX)?;
    validate_date_range(req.start_date, req.end_date)?;

    let challenge = state
        .run(move |db| {
            db.create_challenge(
                &me,
                &NewChallenge {
                    title: &title,
                    description: &description,
                    start_date: req.start_date,
                    end_date: req.end_date,
                    success_criteria: &success_criteria,
                },
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(challenge)))
}

/// PATCH /challenges/{id}
pub async fn update_challenge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateChallengeRequest>,
) -> ApiResult<Json<Challenge>> {
    let challenge = load_challenge(&state, id).await?;
    ensure_same_iris(&me, &challenge.iris_code)?;
    ensure_author_or_admin(&me, challenge.author.id)?;

    validate_date_range(
        req.start_date.unwrap_or(challenge.start_date),
        req.end_date.unwrap_or(challenge.end_date),
    )?;
    let changes = ChallengeChanges {
        title: req.title.as_deref().map(|v| require_text("title", v, TITLE_MAX)).transpose()?,
        description: req
            .description
            .as_deref()
            .map(|v| require_text("description", v, DESCRIPTION_MAX))
            .transpose()?,
        start_date: req.start_date,
        end_date: req.end_date,
        success_criteria: req
            .success_criteria
            .as_deref()
            .map(|v| require_text("successCriteria", v, CRITERIA_MAX))
            .transpose()?,
    };

    let challenge = state
        .run(move |db| db.update_challenge(id, &changes))
        .await?
        .ok_or_else(|| ApiError::not_found("Challenge not found"))?;
    Ok(Json(challenge))
}

/// DELETE /challenges/{id}
pub async fn delete_challenge(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let challenge = load_challenge(&state, id).await?;
    ensure_same_iris(&me, &challenge.iris_code)?;
    ensure_author_or_admin(&me, challenge.author.id)?;
    let deleted = state.run(move |db| db.delete_challenge(id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /challenges/{id}/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    ensure_allowed(&state, &me, "register_challenge").await?;
    let challenge = load_challenge(&state, id).await?;
    ensure_same_iris(&me, &challenge.iris_code)?;

    let user_id = me.id;
    match state.run(move |db| db.subscribe_to_challenge(id, user_id, Utc::now())).await? {
        Subscription::Subscribed => Ok(Json(SuccessResponse { success: true })),
        Subscription::NotFound => Err(ApiError::not_found("Challenge not found")),
        Subscription::Ended => Err(ApiError::bad_request("This challenge has ended")),
        Subscription::AlreadySubscribed => Err(ApiError::conflict("You are already subscribed")),
    }
}

/// DELETE /challenges/{id}/subscribe
pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    ensure_allowed(&state, &me, "register_challenge").await?;
    load_challenge(&state, id).await?;
    let user_id = me.id;
    if !state.run(move |db| db.unsubscribe_from_challenge(id, user_id)).await? {
        return Err(ApiError::not_found("You are not subscribed to this challenge"));
    }
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /challenges/{id}/complete
pub async fn complete(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    let text = optional_text("text", req.text.as_deref(), COMPLETION_TEXT_MAX)?;
    let image_url = optional_text("imageUrl", req.image_url.as_deref(), IMAGE_URL_MAX)?;
    if text.is_none() && image_url.is_none() {
        return Err(ApiError::bad_request("A text or an image is required"));
    }

    let challenge = load_challenge(&state, id).await?;
    ensure_same_iris(&me, &challenge.iris_code)?;

    let user_id = me.id;
    if !state.run(move |db| db.is_registered_to_challenge(id, user_id)).await? {
        return Err(ApiError::forbidden("Subscribe to the challenge before completing it"));
    }

    let completion = state
        .run(move |db| db.create_completion(id, user_id, text.as_deref(), image_url.as_deref()))
        .await?
        .ok_or_else(|| ApiError::conflict("You already have a pending or validated completion"))?;
    Ok((StatusCode::CREATED, Json(completion)))
}

/// PATCH /challenges/{id}/complete/{completion_id}
pub async fn review_completion(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path((id, completion_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReviewCompletionRequest>,
) -> ApiResult<Json<ChallengeCompletion>> {
    let challenge = load_challenge(&state, id).await?;
    ensure_same_iris(&me, &challenge.iris_code)?;
    if !(me.role.is_staff() || challenge.author.id == me.id) {
        return Err(ApiError::forbidden("Only staff or the challenge author can review completions"));
    }

    let reason = optional_text("rejectionReason", req.rejection_reason.as_deref(), 500)?;
    let validated = req.validated;
    let reviewer = me.id;
    enum Outcome {
        Missing,
        OwnCompletion,
        Done(Review),
    }
    let outcome = state
        .run(move |db| match db.get_completion(completion_id)? {
            Some(c) if c.challenge_id != id => Ok(Outcome::Missing),
            Some(c) if c.user.id == reviewer => Ok(Outcome::OwnCompletion),
            Some(_) => Ok(Outcome::Done(db.review_completion(completion_id, validated, reason.as_deref())?)),
            None => Ok(Outcome::Missing),
        })
        .await?;

    let completion = match outcome {
        Outcome::Missing | Outcome::Done(Review::NotFound) => {
            return Err(ApiError::not_found("Completion not found"));
        }
        Outcome::OwnCompletion => return Err(ApiError::forbidden("You cannot review your own completion")),
        Outcome::Done(Review::AlreadyReviewed(status)) => {
            return Err(ApiError::bad_request(format!("Completion already reviewed ({})", status)));
        }
        Outcome::Done(Review::Reviewed(completion)) => completion,
    };

    info!("{} reviewed completion {} ({})", me.id, completion_id, completion.status);
    Ok(Json(completion))
}
