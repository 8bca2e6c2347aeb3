// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External Open Banking provider integrations.

pub mod ais;
pub mod mtls;

pub use ais::{AisClient, AisError, AisGateway, AisOperation};
pub use mtls::{build_mtls_client, MtlsError};
