// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::UserId;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Authenticated user information extracted from a session token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: UserId,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    /// Build from verified claims. Returns `None` for an empty subject.
    pub fn from_claims(claims: SessionClaims) -> Option<Self> {
        if claims.sub.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_id: UserId::new(claims.sub),
            expires_at: claims.exp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_claims_extracts_user_id() {
        let user = AuthenticatedUser::from_claims(SessionClaims {
            sub: "user-42".to_string(),
            exp: 1_700_003_600,
            iat: Some(1_700_000_000),
        })
        .unwrap();
        assert_eq!(user.user_id.as_str(), "user-42");
        assert_eq!(user.expires_at, 1_700_003_600);
    }

    #[test]
    fn from_claims_rejects_blank_subject() {
        let claims = SessionClaims {
            sub: "  ".to_string(),
            exp: 1_700_003_600,
            iat: None,
        };
        assert!(AuthenticatedUser::from_claims(claims).is_none());
    }
}
