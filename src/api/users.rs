// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use crate::auth::Auth;

/// Identify the caller behind the session token.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Authenticated user id as text", body = String),
        (status = 401, description = "Missing or invalid session token")
    )
)]
pub async fn get_current_user(Auth(user): Auth) -> String {
    format!("You are user: {}", user.user_id)
}
