use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};

use quartier_types::models::{Claims, User};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// The authenticated account, loaded fresh for every request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

pub fn decode_token(token: &str, secret: &str) -> ApiResult<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))
}

/// Validate the bearer JWT and attach the [`CurrentUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
    let claims = decode_token(bearer.token(), &state.jwt_secret)?;

    let user = state
        .run(move |db| db.get_user(claims.sub))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
