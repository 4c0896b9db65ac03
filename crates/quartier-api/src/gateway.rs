use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;

use quartier_gateway::connection::{handle_connection, verify_token};
use quartier_types::api::HealthResponse;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    token: Option<String>,
}

/// GET /gateway
///
/// A valid `?token=` skips the Identify step. An invalid one is ignored and
/// the client still gets its identify window.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let pre_authenticated = query
        .token
        .as_deref()
        .and_then(|token| verify_token(token, &state.jwt_secret));
    if query.token.is_some() && pre_authenticated.is_none() {
        debug!("Gateway token in query string rejected, waiting for Identify");
    }

    let ctx = state.gateway_context();
    ws.on_upgrade(move |socket| handle_connection(socket, ctx, pre_authenticated))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".into() })
}
