// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OP connect endpoints.
//!
//! - `start` (authenticated): runs the connect flow and returns the
//!   provider authorize URL for the browser.
//! - `callback` (public): the provider redirects here without a session
//!   token. It only echoes the query string; state lookup and code exchange
//!   are not handled yet.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::info;
use url::form_urlencoded;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::StartConnectResponse;
use crate::state::AppState;

/// Upper bound for a whole start request, on top of the per-step deadlines.
pub const START_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Start an OP account connection for the authenticated user.
#[utoipa::path(
    post,
    path = "/v1/connect/op/start",
    tag = "Connect",
    responses(
        (status = 200, description = "Authorize URL for the browser redirect", body = StartConnectResponse),
        (status = 401, description = "Missing or invalid session token"),
        (status = 500, description = "Signing or persistence failed"),
        (status = 502, description = "AIS provider call failed"),
        (status = 504, description = "Request exceeded its overall deadline")
    ),
    security(("bearer_auth" = []))
)]
pub async fn start_connect(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<StartConnectResponse>, ApiError> {
    let authorization_url = tokio::time::timeout(START_REQUEST_TIMEOUT, state.connect.start(&user.user_id))
        .await
        .map_err(|_| ApiError::gateway_timeout("failed to start OP connect: request timed out"))??;

    Ok(Json(StartConnectResponse { authorization_url }))
}

/// Provider redirect target. Echoes the received query parameters.
#[utoipa::path(
    get,
    path = "/v1/connect/op/callback",
    tag = "Connect",
    responses(
        (status = 200, description = "Query parameters echoed as text", body = String)
    )
)]
pub async fn op_callback(Query(params): Query<Vec<(String, String)>>) -> String {
    info!(params = params.len(), "OP callback received");
    format!("Callback received. Query params: {}", encode_sorted(params))
}

/// Form-encode with keys in sorted order; values of a repeated key keep
/// their arrival order.
fn encode_sorted(mut params: Vec<(String, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(&b.0));
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}
