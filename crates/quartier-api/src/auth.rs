use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use quartier_types::api::{LoginRequest, RefreshRequest, TokenPair};
use quartier_types::models::{Claims, User};

use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const ACCESS_TOKEN_TTL: Duration = Duration::minutes(15);
const REFRESH_TOKEN_TTL: Duration = Duration::days(7);
const REMEMBER_ME_TTL: Duration = Duration::days(30);

const BAD_CREDENTIALS: &str = "Email or password incorrect";

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

pub fn create_access_token(secret: &str, user: &User) -> ApiResult<String> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        exp: (Utc::now() + ACCESS_TOKEN_TTL).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(e.into()))
}

/// A fresh opaque refresh token and the hash stored in its place.
pub fn generate_refresh_token() -> (String, String) {
    let bytes: [u8; 32] = rand::random();
    let token = B64URL.encode(bytes);
    let hash = hash_refresh_token(&token);
    (token, hash)
}

pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

async fn issue_tokens(state: &AppState, user: &User, lifetime: Duration) -> ApiResult<TokenPair> {
    let access_token = create_access_token(&state.jwt_secret, user)?;
    let (refresh_token, hash) = generate_refresh_token();
    let user_id = user.id;
    state
        .run(move |db| db.insert_refresh_token(user_id, &hash, Utc::now() + lifetime))
        .await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// POST /auth/login
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Json<TokenPair>> {
    let email = req.email.trim().to_lowercase();
    let row = state
        .run(move |db| db.get_user_row_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::unauthorized(BAD_CREDENTIALS))?;

    if !verify_password(&req.password, &row.password_hash) {
        warn!("Failed login for {}", row.user.email);
        return Err(ApiError::unauthorized(BAD_CREDENTIALS));
    }

    let lifetime = if req.remember_me { REMEMBER_ME_TTL } else { REFRESH_TOKEN_TTL };
    let tokens = issue_tokens(&state, &row.user, lifetime).await?;
    info!("{} logged in", row.user.email);
    Ok(Json(tokens))
}

/// POST /auth/refresh
///
/// The presented token is revoked and replaced by one with the same
/// lifetime, so a remembered session stays remembered.
pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> ApiResult<Json<TokenPair>> {
    let old_hash = hash_refresh_token(&req.refresh_token);
    let (refresh_token, new_hash) = generate_refresh_token();

    let user = state
        .run(move |db| {
            let Some(user_id) = db.rotate_refresh_token(&old_hash, &new_hash, Utc::now())? else {
                return Ok(None);
            };
            db.get_user(user_id)
        })
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    Ok(Json(TokenPair {
        access_token: create_access_token(&state.jwt_secret, &user)?,
        refresh_token,
    }))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> ApiResult<impl IntoResponse> {
    let hash = hash_refresh_token(&req.refresh_token);
    state.run(move |db| db.revoke_refresh_token(&hash)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
pub async fn me(Extension(CurrentUser(me)): Extension<CurrentUser>) -> Json<User> {
    Json(me)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not a phc string"));
    }

    #[test]
    fn refresh_tokens_are_stored_hashed() {
        let (token, hash) = generate_refresh_token();
        assert_eq!(token.len(), 43);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_refresh_token(&token));
        assert_ne!(generate_refresh_token().0, token);
    }
}
