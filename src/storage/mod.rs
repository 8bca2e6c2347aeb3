// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistence for in-flight OP connect attempts.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   op_authorizations.redb   # state → pending authorization
//! ```
//!
//! The redb store is the production backend; the in-memory store backs tests
//! and local runs that don't need durability.

pub mod pending;

pub use pending::{
    InMemoryPendingStore, PendingAuthorization, PendingAuthorizationStore, RedbPendingStore,
    StoreError, StoreResult,
};
