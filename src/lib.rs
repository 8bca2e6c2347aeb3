// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OP Connect Server - Open Banking account connection service
//!
//! This crate starts the FAPI "Connect" flow against an Account Information
//! Service provider: client-credentials token over mTLS, remote
//! authorization intent, RS256-signed request object, and a durable pending
//! authorization keyed by OAuth `state` for the later callback.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Session token authentication (HS256 JWT)
//! - `config` - Environment configuration
//! - `connect` - Connect flow orchestration
//! - `providers` - mTLS transport and AIS provider client
//! - `signing` - FAPI request object signing
//! - `storage` - Pending authorization store (redb)

pub mod api;
pub mod auth;
pub mod config;
pub mod connect;
pub mod error;
pub mod models;
pub mod providers;
pub mod signing;
pub mod state;
pub mod storage;
