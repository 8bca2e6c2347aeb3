// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::connect::{ConnectError, ConnectStep};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Provider failures are 502; local failures (randomness, signing,
/// persistence, URL assembly) are 500. Only the failing step is exposed;
/// provider bodies stay in the logs.
impl From<ConnectError> for ApiError {
    fn from(e: ConnectError) -> Self {
        let step = e.step();
        let message = format!("failed to start OP connect: {step} failed");
        match step {
            ConnectStep::TokenExchange | ConnectStep::AuthorizationCreate => {
                Self::bad_gateway(message)
            }
            ConnectStep::StateNonce
            | ConnectStep::Signing
            | ConnectStep::Persistence
            | ConnectStep::RedirectUrl => Self::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
