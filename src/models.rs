// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response types shared by the REST API and the connect flow.
//! Wire-facing types derive `Serialize`, `Deserialize`, and `ToSchema` for
//! JSON handling and OpenAPI documentation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// User Identifier
// =============================================================================

/// Authenticated user identifier (the session token's `sub` claim).
///
/// Only produced by the auth extractor for incoming requests; the connect
/// flow never reads it from untyped request context.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        UserId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

// =============================================================================
// Connect Models
// =============================================================================

/// Response for a started connect flow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct StartConnectResponse {
    /// Browser redirect to the provider's authorize endpoint.
    pub authorization_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_serializes_as_plain_string() {
        let id = UserId::new("user-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-42\"");
        let back: UserId = serde_json::from_str("\"user-42\"").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.to_string(), "user-42");
    }
}
