use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::hangman::WordUpdate;
use quartier_types::api::{
    AddWordRequest, DeleteWordRequest, DeletedResponse, HangmanInvite, HangmanWord, InviteAnswer,
    RandomWordQuery, SubmitWordRequest, SuccessResponse, UpdateWordRequest, WordSubmitted,
};
use quartier_types::hangman::normalize_word;
use quartier_types::models::{HangmanRole, InviteStatus};

use crate::error::{ApiError, ApiResult};
use crate::guards::require_admin;
use crate::middleware::CurrentUser;
use crate::state::AppState;

fn check_difficulty(difficulty: u8) -> ApiResult<u8> {
    if (1..=3).contains(&difficulty) {
        Ok(difficulty)
    } else {
        Err(ApiError::bad_request("difficulty must be between 1 and 3"))
    }
}

async fn load_invite(state: &AppState, id: Uuid) -> ApiResult<HangmanInvite> {
    state
        .run(move |db| db.get_invite(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Invite not found"))
}

// -- Dictionary --

/// GET /hangman/words
pub async fn list_words(State(state): State<AppState>) -> ApiResult<Json<Vec<HangmanWord>>> {
    Ok(Json(state.run(|db| db.list_words()).await?))
}

/// GET /hangman/words/random?difficulty=
pub async fn random_word(
    State(state): State<AppState>,
    Query(query): Query<RandomWordQuery>,
) -> ApiResult<Json<HangmanWord>> {
    let difficulty = query.difficulty.map(check_difficulty).transpose()?;
    state
        .run(move |db| db.random_word(difficulty))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No word available"))
}

/// POST /hangman/add-word
pub async fn add_word(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<AddWordRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let word = normalize_word(&req.word)?;
    let difficulty = check_difficulty(req.difficulty)?;

    let stored = word.clone();
    if !state.run(move |db| db.add_word(&stored, difficulty)).await? {
        return Err(ApiError::conflict("This word already exists"));
    }
    info!("Hangman word '{}' added (difficulty {})", word, difficulty);
    Ok((StatusCode::CREATED, Json(HangmanWord { word, difficulty })))
}

/// PATCH /hangman/update-word
pub async fn update_word(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<UpdateWordRequest>,
) -> ApiResult<Json<HangmanWord>> {
    require_admin(&me)?;
    if req.new_word.is_none() && req.difficulty.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let old_word = normalize_word(&req.old_word)?;
    let new_word = req.new_word.as_deref().map(normalize_word).transpose()?;
    let difficulty = req.difficulty.map(check_difficulty).transpose()?;

    match state
        .run(move |db| db.update_word(&old_word, new_word.as_deref(), difficulty))
        .await?
    {
        WordUpdate::Updated(word) => Ok(Json(word)),
        WordUpdate::NotFound => Err(ApiError::not_found("Word not found")),
        WordUpdate::Taken => Err(ApiError::conflict("This word already exists")),
    }
}

/// DELETE /hangman/delete-word
pub async fn delete_word(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<DeleteWordRequest>,
) -> ApiResult<Json<DeletedResponse>> {
    require_admin(&me)?;
    let word = normalize_word(&req.word)?;
    if !state.run(move |db| db.delete_word(&word)).await? {
        return Err(ApiError::not_found("Word not found"));
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

// -- Invites --

/// POST /hangman/invite/send/{recipient_id}
pub async fn send_invite(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(recipient_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if recipient_id == me.id {
        return Err(ApiError::bad_request("You cannot invite yourself"));
    }

    enum Outcome {
        Sent(HangmanInvite),
        UnknownRecipient,
        AlreadyPending,
    }

    let sender_id = me.id;
    let outcome = state
        .run(move |db| {
            if !db.user_exists(recipient_id)? {
                return Ok(Outcome::UnknownRecipient);
            }
            if db.pending_invite_between(sender_id, recipient_id)? {
                return Ok(Outcome::AlreadyPending);
            }
            db.create_invite(sender_id, recipient_id).map(Outcome::Sent)
        })
        .await?;

    match outcome {
        Outcome::Sent(invite) => {
            info!("{} invited {} to a hangman game ({})", sender_id, recipient_id, invite.id);
            Ok((StatusCode::CREATED, Json(invite)))
        }
        Outcome::UnknownRecipient => Err(ApiError::not_found("User not found")),
        Outcome::AlreadyPending => Err(ApiError::conflict("An invite is already pending between you")),
    }
}

/// GET /hangman/invite/pending
pub async fn pending_invites(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<HangmanInvite>>> {
    let user_id = me.id;
    Ok(Json(state.run(move |db| db.pending_invites_for(user_id)).await?))
}

/// GET /hangman/invite/{id}
pub async fn get_invite(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HangmanInvite>> {
    let invite = load_invite(&state, id).await?;
    if !invite.involves(me.id) {
        return Err(ApiError::forbidden("You are not part of this invite"));
    }
    Ok(Json(invite))
}

/// POST /hangman/invite/{id}/{accepted|declined}
pub async fn answer_invite(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path((id, answer)): Path<(Uuid, String)>,
) -> ApiResult<Json<InviteAnswer>> {
    let answer: InviteStatus = answer
        .parse()
        .map_err(|_| ApiError::bad_request("Answer must be 'accepted' or 'declined'"))?;
    if answer == InviteStatus::Pending {
        return Err(ApiError::bad_request("Answer must be 'accepted' or 'declined'"));
    }

    let invite = load_invite(&state, id).await?;
    if invite.recipient.id != me.id {
        return Err(ApiError::forbidden("Only the invited user can answer"));
    }

    let guesser = match answer {
        InviteStatus::Accepted if rand::random::<bool>() => Some(invite.sender.id),
        InviteStatus::Accepted => Some(invite.recipient.id),
        _ => None,
    };
    let answered = state
        .run(move |db| db.answer_invite(id, answer, guesser))
        .await?
        .ok_or_else(|| ApiError::bad_request("This invite is no longer pending"))?;

    let Some(guesser) = guesser else {
        info!("{} declined hangman invite {}", me.id, id);
        return Ok(Json(InviteAnswer::Declined));
    };
    let giver = answered.other_player(guesser);
    state.dispatcher.start_game(id, giver, guesser).await;

    let role = if guesser == me.id { HangmanRole::Guesser } else { HangmanRole::Giver };
    Ok(Json(InviteAnswer::GameStarted { invite_id: id, role }))
}

/// PATCH /hangman/invite/{id}/cancel
pub async fn cancel_invite(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse>> {
    let invite = load_invite(&state, id).await?;
    if invite.sender.id != me.id {
        return Err(ApiError::forbidden("Only the sender can cancel an invite"));
    }
    if !state.run(move |db| db.cancel_invite(id)).await? {
        return Err(ApiError::bad_request("This invite is no longer pending"));
    }
    Ok(Json(SuccessResponse { success: true }))
}

/// PATCH /hangman/invite/{id}/word
pub async fn submit_word(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitWordRequest>,
) -> ApiResult<Json<WordSubmitted>> {
    let invite = load_invite(&state, id).await?;
    if !invite.involves(me.id) {
        return Err(ApiError::forbidden("You are not part of this invite"));
    }
    match invite.role_of(me.id) {
        None => return Err(ApiError::bad_request("The invite has not been accepted")),
        Some(HangmanRole::Guesser) => return Err(ApiError::forbidden("Only the giver can choose the word")),
        Some(HangmanRole::Giver) => {}
    }

    // The round lives in memory; bring it back after a restart.
    if !state.dispatcher.has_game(id).await {
        state.dispatcher.join_game(&invite, me.id).await?;
    }
    Ok(Json(state.dispatcher.submit_word(id, me.id, &req.word).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_is_bounded() {
        assert_eq!(check_difficulty(1).unwrap(), 1);
        assert_eq!(check_difficulty(3).unwrap(), 3);
        assert_eq!(check_difficulty(0).unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert!(check_difficulty(4).is_err());
    }
}
