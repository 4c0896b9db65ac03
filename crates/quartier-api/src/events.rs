use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use quartier_db::queries::events::{EventChanges, NewEvent, Registration};
use quartier_types::api::{DeletedResponse, Event, EventRequest, Page, SuccessResponse, UpdateEventRequest};
use quartier_types::rules::{PageQuery, require_text, validate_date_range};

use crate::error::{ApiError, ApiResult};
use crate::guards::{ensure_allowed, ensure_author_or_admin, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const NAME_MAX: usize = 100;
const PLACE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 5000;

fn check_description(value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.chars().count() > DESCRIPTION_MAX {
        return Err(ApiError::bad_request(format!(
            "description must be at most {} characters",
            DESCRIPTION_MAX
        )));
    }
    Ok(value.to_string())
}

fn check_capacity(max: Option<u32>) -> ApiResult<()> {
    match max {
        Some(0) => Err(ApiError::bad_request("maxParticipants must be at least 1")),
        _ => Ok(()),
    }
}

async fn load_event(state: &AppState, id: Uuid) -> ApiResult<Event> {
    state
        .run(move |db| db.get_event(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

/// GET /events
///
/// Upcoming only, soonest first.
pub async fn list_events(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Event>>> {
    let paging = query.resolve(5);
    let scope = scope_for(&me);
    let (events, total) = state
        .run(move |db| db.list_upcoming_events(scope.as_deref(), paging, Utc::now()))
        .await?;
    Ok(Json(Page::new(events, total, paging)))
}

/// GET /events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Event>> {
    let event = load_event(&state, id).await?;
    ensure_same_iris(&me, &event.iris_code)?;
    Ok(Json(event))
}

/// POST /events
pub async fn create_event(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<EventRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "create_event").await?;
    let name = require_text("name", &req.name, NAME_MAX)?;
    let place = require_text("place", &req.place, PLACE_MAX)?;
    let description = check_description(&req.description)?;
    validate_date_range(req.start_date, req.end_date)?;
    check_capacity(req.max_participants)?;

    let event = state
        .run(move |db| {
            db.create_event(
                &me,
                &NewEvent {
                    name: &name,
                    description: &description,
                    start_date: req.start_date,
                    end_date: req.end_date,
                    place: &place,
                    max_participants: req.max_participants,
                },
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// PATCH /events/{id}
pub async fn update_event(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateEventRequest>,
) -> ApiResult<Json<Event>> {
    let event = load_event(&state, id).await?;
    ensure_same_iris(&me, &event.iris_code)?;
    ensure_author_or_admin(&me, event.author.id)?;

    validate_date_range(
        req.start_date.unwrap_or(event.start_date),
        req.end_date.unwrap_or(event.end_date),
    )?;
    check_capacity(req.max_participants)?;
    let changes = EventChanges {
        name: req.name.as_deref().map(|v| require_text("name", v, NAME_MAX)).transpose()?,
        description: req.description.as_deref().map(check_description).transpose()?,
        start_date: req.start_date,
        end_date: req.end_date,
        place: req.place.as_deref().map(|v| require_text("place", v, PLACE_MAX)).transpose()?,
        max_participants: req.max_participants,
    };

    let event = state
        .run(move |db| db.update_event(id, &changes))
        .await?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    Ok(Json(event))
}

/// DELETE /events/{id}
pub async fn delete_event(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let event = load_event(&state, id).await?;
    ensure_same_iris(&me, &event.iris_code)?;
    ensure_author_or_admin(&me, event.author.id)?;
    let deleted = state.run(move |db| db.delete_event(id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /events/{id}/register
pub async fn register(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    ensure_allowed(&state, &me, "register_event").await?;
    let event = load_event(&state, id).await?;
    ensure_same_iris(&me, &event.iris_code)?;

    let user_id = me.id;
    match state.run(move |db| db.register_to_event(id, user_id, Utc::now())).await? {
        Registration::Registered => Ok(Json(SuccessResponse { success: true })),
        Registration::NotFound => Err(ApiError::not_found("Event not found")),
        Registration::AlreadyStarted => Err(ApiError::bad_request("This event has already started")),
        Registration::AlreadyRegistered => Err(ApiError::conflict("You are already registered")),
        Registration::Full => Err(ApiError::conflict("This event is full")),
    }
}

/// DELETE /events/{id}/register
pub async fn unregister(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    load_event(&state, id).await?;
    let user_id = me.id;
    if !state.run(move |db| db.unregister_from_event(id, user_id)).await? {
        return Err(ApiError::not_found("You are not registered to this event"));
    }
    Ok(Json(SuccessResponse { success: true }))
}
