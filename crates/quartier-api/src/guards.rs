//! Authorization checks shared by the handlers.

use chrono::Utc;
use uuid::Uuid;

use quartier_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Iris filter for listings: admins see every neighborhood.
pub fn scope_for(user: &User) -> Option<String> {
    (!user.role.is_admin()).then(|| user.iris_code.clone())
}

/// Fail while `user` has an active restriction on `code`.
pub async fn ensure_allowed(state: &AppState, user: &User, code: &'static str) -> ApiResult<()> {
    let user_id = user.id;
    let restriction = state
        .run(move |db| db.active_restriction(user_id, code, Utc::now()))
        .await?;
    match restriction {
        Some(_) => Err(ApiError::forbidden(format!(
            "You are banned from performing this action ({})",
            code
        ))),
        None => Ok(()),
    }
}

pub fn ensure_same_iris(user: &User, iris_code: &str) -> ApiResult<()> {
    if user.can_see_iris(iris_code) {
        Ok(())
    } else {
        Err(ApiError::forbidden("This content belongs to another neighborhood"))
    }
}

pub fn require_staff(user: &User) -> ApiResult<()> {
    if user.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Reserved to moderators and admins"))
    }
}

pub fn require_admin(user: &User) -> ApiResult<()> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Reserved to admins"))
    }
}

/// The author or an admin.
pub fn ensure_author_or_admin(user: &User, author_id: Uuid) -> ApiResult<()> {
    if user.id == author_id || user.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the author can do this"))
    }
}

/// The author or any staff member.
pub fn ensure_author_or_staff(user: &User, author_id: Uuid) -> ApiResult<()> {
    if user.id == author_id || user.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the author or a moderator can do this"))
    }
}
