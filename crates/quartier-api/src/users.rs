use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use quartier_db::is_unique_violation;
use quartier_db::models::NewUser;
use quartier_db::queries::users::UserChanges;
use quartier_types::api::{
    AddressRequest, DeletedResponse, ProfileResponse, RegisterRequest, SearchQuery, UpdateUserRequest,
};
use quartier_types::models::{DEFAULT_PROFILE_PICTURE, Role, User, UserSummary};
use quartier_types::rules::{optional_text, require_text, validate_email, validate_password};

use crate::auth::hash_password;
use crate::error::{ApiError, ApiResult};
use crate::files::{Form, UploadKind};
use crate::iris::require_address;
use crate::middleware::CurrentUser;
use crate::state::AppState;

const SEARCH_LIMIT: u32 = 10;

async fn load_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    state
        .run(move |db| db.get_user(id))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

fn ensure_self_or_admin(me: &User, id: Uuid) -> ApiResult<()> {
    if me.id == id || me.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("You can only manage your own account"))
    }
}

/// POST /users
pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> ApiResult<impl IntoResponse> {
    let firstname = require_text("firstname", &req.firstname, 50)?;
    let lastname = require_text("lastname", &req.lastname, 50)?;
    let email = validate_email(&req.email)?;
    validate_password(&req.password)?;
    if req.date_of_birth >= Utc::now().date_naive() {
        return Err(ApiError::bad_request("dateOfBirth must be in the past"));
    }
    let address = optional_text("address", req.address.as_deref(), 300)?;
    let (iris_code, iris_name) = match (
        optional_text("irisCode", req.iris_code.as_deref(), 20)?,
        optional_text("irisName", req.iris_name.as_deref(), 200)?,
    ) {
        (Some(code), Some(name)) => (code, name),
        _ => return Err(ApiError::conflict("An IRIS code and name are required to register")),
    };

    let role = match &state.admin_email {
        Some(admin) if admin.eq_ignore_ascii_case(&email) => Role::Admin,
        _ => Role::User,
    };
    let password_hash = hash_password(&req.password)?;
    let date_of_birth = req.date_of_birth;

    let user = state
        .run(move |db| {
            if db.email_taken(&email, None)? {
                return Ok(None);
            }
            let created = db.create_user(&NewUser {
                firstname: &firstname,
                lastname: &lastname,
                email: &email,
                password_hash: &password_hash,
                date_of_birth,
                role,
                address: address.as_deref(),
                iris_code: &iris_code,
                iris_name: &iris_name,
            });
            match created {
                Ok(user) => Ok(Some(user)),
                // A concurrent registration took the email after the check
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?
        .ok_or_else(|| ApiError::conflict("Email already in use"))?;

    info!("Registered {} ({}) as {}", user.email, user.id, user.role);
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.run(|db| db.list_users()).await?))
}

/// GET /users/{id}
pub async fn get_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<User>> {
    Ok(Json(load_user(&state, id).await?))
}

/// GET /users/search?q=
pub async fn search_users(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> ApiResult<Json<Vec<User>>> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(state.run(move |db| db.search_users(&needle, SEARCH_LIMIT)).await?))
}

/// PATCH /users/{id}
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    ensure_self_or_admin(&me, id)?;
    if req.role.is_some() && !me.role.is_admin() {
        return Err(ApiError::forbidden("Only admins can change roles"));
    }

    let email = req.email.as_deref().map(validate_email).transpose()?;
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };
    let changes = UserChanges {
        firstname: req.firstname.as_deref().map(|v| require_text("firstname", v, 50)).transpose()?,
        lastname: req.lastname.as_deref().map(|v| require_text("lastname", v, 50)).transpose()?,
        email,
        password_hash,
        date_of_birth: req.date_of_birth,
        role: req.role,
    };

    enum Outcome {
        Updated(User),
        Missing,
        EmailTaken,
    }

    let outcome = state
        .run(move |db| {
            if let Some(email) = &changes.email {
                if db.email_taken(email, Some(id))? {
                    return Ok(Outcome::EmailTaken);
                }
            }
            Ok(match db.update_user(id, &changes) {
                Ok(Some(user)) => Outcome::Updated(user),
                Ok(None) => Outcome::Missing,
                Err(e) if is_unique_violation(&e) => Outcome::EmailTaken,
                Err(e) => return Err(e),
            })
        })
        .await?;

    match outcome {
        Outcome::Updated(user) => Ok(Json(user)),
        Outcome::Missing => Err(ApiError::not_found("User not found")),
        Outcome::EmailTaken => Err(ApiError::conflict("Email already in use")),
    }
}

/// DELETE /users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<DeletedResponse>> {
    ensure_self_or_admin(&me, id)?;
    let user = load_user(&state, id).await?;
    let deleted = state.run(move |db| db.delete_user(id)).await?;
    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }
    if user.profile_picture != DEFAULT_PROFILE_PICTURE {
        state.uploads.remove(&user.profile_picture).await;
    }
    info!("Deleted user {} ({})", user.email, id);
    Ok(Json(DeletedResponse { deleted }))
}

/// GET /users/{id}/profile
pub async fn profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let viewer = me.id;
    let profile = state
        .run(move |db| {
            let Some(user) = db.get_user(id)? else {
                return Ok(None);
            };
            let friendship = if viewer == id {
                None
            } else {
                Some(db.friendship_state(viewer, id)?)
            };
            Ok(Some(ProfileResponse {
                badges: db.badges_of(id)?,
                participating_events: db.events_of_participant(id)?,
                challenges: db.challenges_of_user(id)?,
                market_items: db.market_items_of(id)?,
                is_friend: friendship.map(|f| f.is_friend),
                request_sent: friendship.map(|f| f.request_sent),
                request_received: friendship.map(|f| f.request_received),
                user,
            }))
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(profile))
}

/// POST /users/me/profile-picture
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<Json<User>> {
    let mut form = Form::read(multipart).await?;
    let file = form
        .take_file("image")
        .or_else(|| form.files.pop())
        .ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let url = state.uploads.save_image(UploadKind::Profile, &file).await?;

    let id = me.id;
    let stored = url.clone();
    let previous = state.run(move |db| db.set_profile_picture(id, &stored)).await?;
    match previous {
        Some(previous) if previous != DEFAULT_PROFILE_PICTURE => state.uploads.remove(&previous).await,
        Some(_) => {}
        None => {
            state.uploads.remove(&url).await;
            return Err(ApiError::not_found("User not found"));
        }
    }
    Ok(Json(load_user(&state, id).await?))
}

/// PATCH /users/me/address
pub async fn update_address(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<Json<User>> {
    let (street, postal_code, city) = require_address(&req)?;
    let iris = state.iris.resolve(&req).await?;
    let address = format!("{}, {} {}", street, postal_code, city);

    let id = me.id;
    let user = state
        .run(move |db| db.set_address(id, &address, &iris.iris_code, &iris.iris_name))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!("{} moved to IRIS {}", user.id, user.iris_code);
    Ok(Json(user))
}

/// GET /users/me/staff
pub async fn staff(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<User>>> {
    let iris = me.iris_code.clone();
    Ok(Json(state.run(move |db| db.list_staff(&iris)).await?))
}

// -- Friends --

/// GET /users/{id}/friends
pub async fn list_friends(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<UserSummary>>> {
    load_user(&state, id).await?;
    Ok(Json(state.run(move |db| db.list_friends(id)).await?))
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestOutcome {
    pub status: &'static str,
}

/// POST /users/{id}/friend-request
pub async fn send_friend_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    if me.id == id {
        return Err(ApiError::conflict("You cannot befriend yourself"));
    }
    load_user(&state, id).await?;

    let sender = me.id;
    let state_now = state.run(move |db| db.friendship_state(sender, id)).await?;
    if state_now.is_friend {
        return Err(ApiError::conflict("You are already friends"));
    }
    if state_now.request_sent {
        return Err(ApiError::conflict("Friend request already sent"));
    }

    if state_now.request_received {
        state.run(move |db| db.accept_friend_request(id, sender)).await?;
        info!("{} and {} are now friends", sender, id);
        return Ok((StatusCode::OK, Json(FriendRequestOutcome { status: "accepted" })));
    }

    if !state.run(move |db| db.create_friend_request(sender, id)).await? {
        return Err(ApiError::conflict("Friend request already sent"));
    }
    Ok((StatusCode::CREATED, Json(FriendRequestOutcome { status: "pending" })))
}

/// POST /users/{id}/accept-friend
pub async fn accept_friend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<FriendRequestOutcome>> {
    let recipient = me.id;
    if !state.run(move |db| db.accept_friend_request(id, recipient)).await? {
        return Err(ApiError::conflict("No pending friend request from this user"));
    }
    info!("{} and {} are now friends", recipient, id);
    Ok(Json(FriendRequestOutcome { status: "accepted" }))
}

/// DELETE /users/{id}/reject-friend
///
/// Declines a received request, or
/// withdraws one sent to `id`.
pub async fn reject_friend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<DeletedResponse>> {
    let me_id = me.id;
    let deleted = state
        .run(move |db| Ok(db.delete_friend_request(id, me_id)? | db.delete_friend_request(me_id, id)?))
        .await?;
    if !deleted {
        return Err(ApiError::not_found("No pending friend request with this user"));
    }
    Ok(Json(DeletedResponse { deleted }))
}

/// DELETE /users/{id}/remove-friend
pub async fn remove_friend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<DeletedResponse>> {
    let me_id = me.id;
    let deleted = state.run(move |db| db.remove_friendship(me_id, id)).await?;
    if !deleted {
        return Err(ApiError::not_found("You are not friends with this user"));
    }
    Ok(Json(DeletedResponse { deleted }))
}
