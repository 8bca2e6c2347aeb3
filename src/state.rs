// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthConfig;
use crate::connect::ConnectService;

#[derive(Clone)]
pub struct AppState {
    pub connect: Arc<ConnectService>,
    pub auth: AuthConfig,
    /// Directory holding the pending-authorization database, reported by
    /// the health check.
    pub data_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(connect: ConnectService, auth: AuthConfig) -> Self {
        Self {
            connect: Arc::new(connect),
            auth,
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}
