// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Session-token authentication for the connect API.
//!
//! ## Auth Flow
//!
//! 1. The identity service issues an HS256 session JWT at login
//! 2. Clients send `Authorization: Bearer <session JWT>`
//! 3. This server:
//!    - Verifies the HS256 signature with `JWT_SECRET`
//!    - Rejects any other algorithm (including `none`)
//!    - Checks expiry with a small clock-skew leeway
//!    - Extracts `sub` → typed [`UserId`](crate::models::UserId)
//!
//! ## Security
//!
//! - `/v1/connect/op/start` requires authentication
//! - `/health`, `/docs` and the provider callback are public

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::{AuthenticatedUser, SessionClaims};
pub use error::AuthError;
pub use extractor::{Auth, AuthConfig};
