use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::chat::GroupExit;
use quartier_gateway::connection::can_access_room;
use quartier_types::api::{ChatGroup, ChatMessage, CreateGroupRequest, DeletedResponse};
use quartier_types::events::GatewayEvent;
use quartier_types::rooms::Room;
use quartier_types::rules::require_text;

use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Number of messages returned when opening a room.
pub const HISTORY_LIMIT: u32 = 100;

/// GET /chat/messages/{room}
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(room): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let parsed: Room = room.parse().map_err(ApiError::BadRequest)?;
    let user_id = me.id;
    let messages = state
        .run(move |db| {
            if !can_access_room(db, &parsed, user_id)? {
                return Ok(None);
            }
            db.list_chat_messages(&parsed.to_string(), HISTORY_LIMIT).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::forbidden("You do not have access to this room"))?;
    Ok(Json(messages))
}

/// POST /chat/groups
pub async fn create_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = require_text("name", &req.name, 100)?;
    let creator = me.id;
    let members = req.member_ids;

    let group = state
        .run(move |db| {
            for id in &members {
                if !db.user_exists(*id)? {
                    return Ok(Err(*id));
                }
            }
            db.create_chat_group(&name, creator, &members).map(Ok)
        })
        .await?
        .map_err(|missing| ApiError::not_found(format!("User {} not found", missing)))?;

    info!("{} created chat group {} ({} members)", creator, group.id, group.members.len());
    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /chat/groups
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<ChatGroup>>> {
    let user_id = me.id;
    Ok(Json(state.run(move |db| db.chat_groups_of(user_id)).await?))
}

/// DELETE /chat/groups/{id}/leave
pub async fn leave_group(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let user_id = me.id;
    let exit = state.run(move |db| db.leave_chat_group(id, user_id)).await?;
    if exit == GroupExit::NotMember {
        return Err(ApiError::bad_request("You are not a member of this group"));
    }

    // Drop the room from the leaver's live connection
    let room = Room::Group(id).to_string();
    state.dispatcher.send_to_user(user_id, GatewayEvent::RoomLeft { room }).await;

    let deleted = exit == GroupExit::Deleted;
    if deleted {
        info!("Chat group {} deleted after its last member left", id);
    }
    Ok(Json(DeletedResponse { deleted }))
}
