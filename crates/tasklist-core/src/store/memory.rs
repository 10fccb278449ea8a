use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, instrument};

use super::{OrderBy, RemoteStore, StoreError};
use crate::task::{NewTask, Task, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Insert,
    Update,
    UpdateMany,
    DeleteOne,
    DeleteMany,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Task>>,
    next_id: i64,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    gates: HashMap<StoreOp, Arc<Notify>>,
}

/// In-process store with the same semantics as the Postgres one.
///
/// Tests drive it through `fail_next` (queue an error for the next call of
/// an operation) and `hold` (park the next call until the returned `Notify`
/// fires), which lets them resolve in-flight requests in any order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty, provisioned table.
    pub fn provisioned(table: &str) -> Self {
        let store = Self::new();
        store.provision(table);
        store
    }

    pub fn provision(&self, table: &str) {
        let mut state = self.state.lock();
        state.tables.entry(table.to_string()).or_default();
        if state.next_id == 0 {
            state.next_id = 1;
        }
    }

    /// Replaces the table contents, keeping ids and timestamps as given.
    pub fn seed(&self, table: &str, tasks: Vec<Task>) {
        let mut state = self.state.lock();
        let max_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        state.next_id = state.next_id.max(max_id + 1);
        state.tables.insert(table.to_string(), tasks);
    }

    /// Seeds `texts` with ids `1..` and dense order indices `0..`.
    pub fn seed_texts(&self, table: &str, texts: &[&str]) {
        let now = Utc::now();
        let tasks = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| Task {
                id: idx as i64 + 1,
                text: (*text).to_string(),
                completed: false,
                order_index: idx as i32,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.seed(table, tasks);
    }

    pub fn drop_table(&self, table: &str) {
        self.state.lock().tables.remove(table);
    }

    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn hold(&self, op: StoreOp) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().gates.insert(op, gate.clone());
        gate
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Rows sorted the way `list(.., OrderBy::OrderIndex)` returns them.
    pub fn rows(&self, table: &str) -> Vec<Task> {
        let mut rows = self
            .state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|t| (t.order_index, t.id));
        rows
    }

    async fn enter(&self, op: StoreOp, table: &str) -> Result<(), StoreError> {
        let gate = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            state.gates.remove(&op)
        };

        if let Some(gate) = gate {
            debug!(?op, "memory store call held");
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!(?op, error = %err, "memory store injected failure");
            return Err(err);
        }
        if !state.tables.contains_key(table) {
            return Err(StoreError::RelationMissing {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Vec<Task>, &mut i64) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        let MemoryState {
            tables, next_id, ..
        } = &mut *state;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::RelationMissing {
                table: table.to_string(),
            })?;
        f(rows, next_id)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    #[instrument(skip(self))]
    async fn list(&self, table: &str, order_by: OrderBy) -> Result<Vec<Task>, StoreError> {
        self.enter(StoreOp::List, table).await?;
        self.with_table(table, |rows, _| {
            let mut out = rows.clone();
            match order_by {
                OrderBy::OrderIndex => out.sort_by_key(|t| (t.order_index, t.id)),
            }
            Ok(out)
        })
    }

    #[instrument(skip(self, task), fields(order_index = task.order_index))]
    async fn insert(&self, table: &str, task: NewTask) -> Result<Task, StoreError> {
        self.enter(StoreOp::Insert, table).await?;
        self.with_table(table, |rows, next_id| {
            let now = Utc::now();
            let id = (*next_id).max(1);
            *next_id = id + 1;
            let created = Task {
                id,
                text: task.text,
                completed: false,
                order_index: task.order_index,
                created_at: now,
                updated_at: now,
            };
            rows.push(created.clone());
            Ok(created)
        })
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, table: &str, id: i64, patch: TaskPatch) -> Result<(), StoreError> {
        self.enter(StoreOp::Update, table).await?;
        self.with_table(table, |rows, _| {
            let row = rows
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(StoreError::NotFound { id })?;
            patch.apply_to(row);
            row.updated_at = Utc::now();
            Ok(())
        })
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_many(
        &self,
        table: &str,
        updates: &[(i64, TaskPatch)],
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::UpdateMany, table).await?;
        self.with_table(table, |rows, _| {
            let known: HashSet<i64> = rows.iter().map(|t| t.id).collect();
            if let Some((id, _)) = updates.iter().find(|(id, _)| !known.contains(id)) {
                return Err(StoreError::NotFound { id: *id });
            }

            let now = Utc::now();
            for (id, patch) in updates {
                if let Some(row) = rows.iter_mut().find(|t| t.id == *id) {
                    patch.apply_to(row);
                    row.updated_at = now;
                }
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn delete_one(&self, table: &str, id: i64) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteOne, table).await?;
        self.with_table(table, |rows, _| {
            let before = rows.len();
            rows.retain(|t| t.id != id);
            if rows.len() == before {
                return Err(StoreError::NotFound { id });
            }
            Ok(())
        })
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, table: &str, ids: &[i64]) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteMany, table).await?;
        self.with_table(table, |rows, _| {
            let doomed: HashSet<i64> = ids.iter().copied().collect();
            rows.retain(|t| !doomed.contains(&t.id));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, StoreOp};
    use crate::store::{OrderBy, RemoteStore, StoreError};
    use crate::task::{NewTask, TaskPatch};

    #[tokio::test]
    async fn missing_table_is_reported_as_relation_missing() {
        let store = MemoryStore::new();
        let err = store
            .list("todos", OrderBy::OrderIndex)
            .await
            .expect_err("table was never provisioned");
        assert!(err.is_relation_missing());
        assert_eq!(store.calls(StoreOp::List), 1);
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_after_seed() {
        let store = MemoryStore::provisioned("todos");
        store.seed_texts("todos", &["a", "b"]);

        let created = store
            .insert(
                "todos",
                NewTask {
                    text: "c".to_string(),
                    order_index: 2,
                },
            )
            .await
            .expect("insert");
        assert_eq!(created.id, 3);
        assert!(!created.completed);
        assert_eq!(store.rows("todos").len(), 3);
    }

    #[tokio::test]
    async fn update_many_is_all_or_nothing() {
        let store = MemoryStore::provisioned("todos");
        store.seed_texts("todos", &["a", "b"]);

        let err = store
            .update_many(
                "todos",
                &[
                    (1, TaskPatch::order_index(5)),
                    (99, TaskPatch::order_index(6)),
                ],
            )
            .await
            .expect_err("unknown id");
        assert_eq!(err, StoreError::NotFound { id: 99 });

        let rows = store.rows("todos");
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].order_index, 0);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let store = MemoryStore::provisioned("todos");
        store.seed_texts("todos", &["a"]);
        store.fail_next(StoreOp::DeleteOne, StoreError::Connection("reset".to_string()));

        assert!(store.delete_one("todos", 1).await.is_err());
        assert!(store.delete_one("todos", 1).await.is_ok());
        assert!(store.rows("todos").is_empty());
        assert_eq!(store.calls(StoreOp::DeleteOne), 2);
    }
}
