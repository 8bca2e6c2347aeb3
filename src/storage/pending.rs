// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pending OP authorizations keyed by OAuth `state`.
//!
//! ## Table Layout
//!
//! - `op_authorizations`: state → serialized PendingAuthorization (JSON bytes)
//!
//! Rows are inserted once per connect attempt and never updated here.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::UserId;

const PENDING_AUTHORIZATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("op_authorizations");

/// Correlation record for a started connect flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub user_id: UserId,
    pub authorization_id: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("pending authorization with state {0} already exists")]
    DuplicateState(String),

    #[error("create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for pending authorizations.
pub trait PendingAuthorizationStore: Send + Sync {
    /// Insert a new record atomically. Fails with
    /// [`StoreError::DuplicateState`] if the state is already present; never
    /// leaves a partial row behind.
    fn save_pending(
        &self,
        record: PendingAuthorization,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Embedded ACID store backed by redb.
#[derive(Clone)]
pub struct RedbPendingStore {
    db: Arc<Database>,
}

impl RedbPendingStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so read transactions never see it missing
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_AUTHORIZATIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Look up a record by state.
    pub fn get(&self, state: &str) -> StoreResult<Option<PendingAuthorization>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_AUTHORIZATIONS)?;
        match table.get(state)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_AUTHORIZATIONS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn insert_new(db: &Database, record: &PendingAuthorization) -> StoreResult<()> {
        let json = serde_json::to_vec(record)?;

        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_AUTHORIZATIONS)?;
            if table.get(record.state.as_str())?.is_some() {
                // Dropping the uncommitted transaction aborts it
                return Err(StoreError::DuplicateState(record.state.clone()));
            }
            table.insert(record.state.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl PendingAuthorizationStore for RedbPendingStore {
    async fn save_pending(&self, record: PendingAuthorization) -> StoreResult<()> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || Self::insert_new(&db, &record))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// In-memory store for tests and local development.
#[derive(Default, Clone)]
pub struct InMemoryPendingStore {
    records: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, state: &str) -> Option<PendingAuthorization> {
        self.records.read().await.get(state).cloned()
    }

    pub async fn all(&self) -> Vec<PendingAuthorization> {
        self.records.read().await.values().cloned().collect()
    }
}

impl PendingAuthorizationStore for InMemoryPendingStore {
    async fn save_pending(&self, record: PendingAuthorization) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.state) {
            return Err(StoreError::DuplicateState(record.state));
        }
        records.insert(record.state.clone(), record);
        Ok(())
    }
}
