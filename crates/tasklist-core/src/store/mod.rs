//! Remote store contract the task list reconciles against.
//!
//! Implementations: [`MemoryStore`] (in-process, used by tests and the
//! `memory` backend) and [`PgStore`] (Postgres through an r2d2 pool).

mod memory;
mod pg;

use async_trait::async_trait;

pub use self::memory::{MemoryStore, StoreOp};
pub use self::pg::PgStore;
use crate::task::{NewTask, Task, TaskPatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("relation `{table}` does not exist")]
    RelationMissing { table: String },

    #[error("row {id} not found")]
    NotFound { id: i64 },

    #[error("invalid table name `{0}`")]
    InvalidTable(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_relation_missing(&self) -> bool {
        matches!(self, StoreError::RelationMissing { .. })
    }
}

/// Column a listing is sorted by, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    OrderIndex,
}

impl OrderBy {
    pub fn column(self) -> &'static str {
        match self {
            OrderBy::OrderIndex => "order_index",
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list(&self, table: &str, order_by: OrderBy) -> Result<Vec<Task>, StoreError>;

    async fn insert(&self, table: &str, task: NewTask) -> Result<Task, StoreError>;

    async fn update(&self, table: &str, id: i64, patch: TaskPatch) -> Result<(), StoreError>;

    /// Applies every patch or none of them.
    async fn update_many(
        &self,
        table: &str,
        updates: &[(i64, TaskPatch)],
    ) -> Result<(), StoreError>;

    async fn delete_one(&self, table: &str, id: i64) -> Result<(), StoreError>;

    async fn delete_many(&self, table: &str, ids: &[i64]) -> Result<(), StoreError>;
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
    let valid_rest = chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');

    if valid_start && valid_rest && table.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}
