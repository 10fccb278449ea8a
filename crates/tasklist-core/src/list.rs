//! The ordered task list and its reconciliation with the remote store.
//!
//! Every mutating operation goes through [`OrderedTaskList::transact`]:
//! plan against the current state, then either apply-then-confirm
//! (optimistic) or confirm-then-apply (confirmed). Local state sits behind a
//! mutex that is never held across an `.await`, so several operations can
//! be in flight at once.
//!
//! A revision counter is bumped on every local mutation. An optimistic
//! operation only restores its snapshot if nothing else touched the list
//! while its request was pending; otherwise it reloads from the store so a
//! late failure cannot clobber newer state.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::ordering::{
    apply_sequence, dense_updates, move_item, next_order_index, sort_by_order,
};
use crate::policy::{Policies, UpdatePolicy};
use crate::report::{Notice, StatusReporter, TracingReporter};
use crate::store::{OrderBy, RemoteStore, StoreError};
use crate::task::{NewTask, Task, TaskPatch, normalize_text};

pub const DEFAULT_TABLE: &str = "todos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Insert,
    Reorder,
    Toggle,
    Rename,
    Delete,
    ClearCompleted,
}

impl Operation {
    fn describe(self) -> &'static str {
        match self {
            Operation::Load => "load your tasks",
            Operation::Insert => "add the task",
            Operation::Reorder => "save the new order",
            Operation::Toggle => "update the task",
            Operation::Rename => "rename the task",
            Operation::Delete => "delete the task",
            Operation::ClearCompleted => "clear completed tasks",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Load => "load",
            Operation::Insert => "insert",
            Operation::Reorder => "reorder",
            Operation::Toggle => "toggle",
            Operation::Rename => "rename",
            Operation::Delete => "delete",
            Operation::ClearCompleted => "clear_completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("{op} failed: {source}")]
    Store {
        op: Operation,
        #[source]
        source: StoreError,
    },

    #[error("store returned duplicate task id {0}")]
    DuplicateId(i64),
}

impl ListError {
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ListError::Store { source, .. } => Some(source),
            ListError::DuplicateId(_) => None,
        }
    }

    pub fn is_relation_missing(&self) -> bool {
        self.store_error()
            .is_some_and(StoreError::is_relation_missing)
    }
}

/// The single task currently being renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub task_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditRejected {
    #[error("task {0} not found")]
    NotFound(i64),

    #[error("task {0} is completed and cannot be edited")]
    Completed(i64),
}

#[derive(Debug, Default)]
struct ListState {
    tasks: Vec<Task>,
    editing: Option<EditSession>,
    revision: u64,
}

impl ListState {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn get(&self, id: i64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: i64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn end_edit_for(&mut self, ids: &[i64]) {
        if self
            .editing
            .as_ref()
            .is_some_and(|session| ids.contains(&session.task_id))
        {
            self.editing = None;
        }
    }
}

#[derive(Debug, Clone)]
struct ReorderPlan {
    order: Vec<i64>,
    updates: Vec<(i64, TaskPatch)>,
}

pub struct OrderedTaskList {
    store: Arc<dyn RemoteStore>,
    reporter: Arc<dyn StatusReporter>,
    table: String,
    policies: Policies,
    state: Mutex<ListState>,
}

impl fmt::Debug for OrderedTaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OrderedTaskList")
            .field("table", &self.table)
            .field("policies", &self.policies)
            .field("tasks", &state.tasks.len())
            .field("revision", &state.revision)
            .finish()
    }
}

impl OrderedTaskList {
    /// Notices go to the log until a reporter is set with
    /// [`with_reporter`](Self::with_reporter).
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            reporter: Arc::new(TracingReporter),
            table: DEFAULT_TABLE.to_string(),
            policies: Policies::default(),
            state: Mutex::new(ListState::default()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn policies(&self) -> Policies {
        self.policies
    }

    /// Snapshot of the current display order.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn get(&self, id: i64) -> Option<Task> {
        self.state.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    pub fn has_completed(&self) -> bool {
        self.state.lock().tasks.iter().any(|t| t.completed)
    }

    pub fn remaining_count(&self) -> usize {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.completed)
            .count()
    }

    /// Replaces local state with the store's rows in `order_index` order.
    /// On failure the list is left empty.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn load(&self) -> Result<Vec<Task>, ListError> {
        let mut tasks = match self.store.list(&self.table, OrderBy::OrderIndex).await {
            Ok(tasks) => tasks,
            Err(err) => {
                self.reset();
                return Err(self.fail(Operation::Load, err));
            }
        };
        sort_by_order(&mut tasks);

        let mut seen = HashSet::with_capacity(tasks.len());
        if let Some(dup) = tasks.iter().find(|t| !seen.insert(t.id)) {
            let id = dup.id;
            self.reset();
            error!(id, "store returned duplicate task id");
            self.reporter.report(Notice::error(format!(
                "Could not {}. Please try again.",
                Operation::Load.describe()
            )));
            return Err(ListError::DuplicateId(id));
        }

        {
            let mut state = self.state.lock();
            let ids: HashSet<i64> = tasks.iter().map(|t| t.id).collect();
            if state
                .editing
                .as_ref()
                .is_some_and(|session| !ids.contains(&session.task_id))
            {
                state.editing = None;
            }
            state.tasks = tasks.clone();
            state.bump();
        }

        info!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    /// Creates a task at the end of the list. Blank text is ignored
    /// without contacting the store.
    #[instrument(skip(self, text), fields(table = %self.table))]
    pub async fn insert(&self, text: &str) -> Result<Option<Task>, ListError> {
        let Some(text) = normalize_text(text) else {
            debug!("ignoring blank insert");
            return Ok(None);
        };

        let order_index = {
            let state = self.state.lock();
            next_order_index(&state.tasks)
        };

        let created = match self
            .store
            .insert(&self.table, NewTask { text, order_index })
            .await
        {
            Ok(task) => task,
            Err(err) => return Err(self.fail(Operation::Insert, err)),
        };

        {
            let mut state = self.state.lock();
            if state.get(created.id).is_none() {
                state.tasks.push(created.clone());
                state.bump();
            }
        }

        info!(id = created.id, order_index, "inserted task");
        Ok(Some(created))
    }

    /// Moves `moved_id` into the slot held by `target_id` and persists the
    /// resulting dense `0..N-1` indices in one batched store call.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn reorder(
        &self,
        moved_id: i64,
        target_id: Option<i64>,
    ) -> Result<bool, ListError> {
        let Some(target_id) = target_id.filter(|target| *target != moved_id) else {
            return Ok(false);
        };

        self.transact(
            Operation::Reorder,
            self.policies.reorder,
            |state| {
                let from = state.position(moved_id)?;
                let to = state.position(target_id)?;
                let mut sequence = state.tasks.clone();
                move_item(&mut sequence, from, to);
                let updates = dense_updates(&sequence);
                debug!(from, to, changed = updates.len(), "planned reorder");
                Some(ReorderPlan {
                    order: sequence.iter().map(|t| t.id).collect(),
                    updates,
                })
            },
            |plan| async move {
                if plan.updates.is_empty() {
                    return Ok(());
                }
                self.store.update_many(&self.table, &plan.updates).await
            },
            |state, plan| apply_sequence(&mut state.tasks, &plan.order),
        )
        .await
    }

    /// Flips `completed` for one task.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn toggle(&self, id: i64) -> Result<bool, ListError> {
        self.transact(
            Operation::Toggle,
            self.policies.toggle,
            |state| state.get(id).map(|task| !task.completed),
            |completed| {
                self.store
                    .update(&self.table, id, TaskPatch::completed(completed))
            },
            |state, completed| {
                if let Some(task) = state.get_mut(id) {
                    task.completed = *completed;
                }
            },
        )
        .await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete(&self, id: i64) -> Result<bool, ListError> {
        self.transact(
            Operation::Delete,
            self.policies.delete,
            |state| state.get(id).map(|_| id),
            |id| self.store.delete_one(&self.table, id),
            |state, id| {
                state.tasks.retain(|t| t.id != *id);
                state.end_edit_for(&[*id]);
            },
        )
        .await
    }

    /// Removes every completed task with one bulk delete; locally it is all
    /// or nothing.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn clear_completed(&self) -> Result<bool, ListError> {
        let cleared = self
            .transact(
                Operation::ClearCompleted,
                self.policies.clear,
                |state| {
                    let ids: Vec<i64> = state
                        .tasks
                        .iter()
                        .filter(|t| t.completed)
                        .map(|t| t.id)
                        .collect();
                    (!ids.is_empty()).then_some(ids)
                },
                |ids| async move { self.store.delete_many(&self.table, &ids).await },
                |state, ids| {
                    let doomed: HashSet<i64> = ids.iter().copied().collect();
                    state.tasks.retain(|t| !doomed.contains(&t.id));
                    state.end_edit_for(ids);
                },
            )
            .await?;
        if !cleared {
            self.reporter.report(Notice::info("No completed tasks."));
        }
        Ok(cleared)
    }

    pub fn editing(&self) -> Option<EditSession> {
        self.state.lock().editing.clone()
    }

    /// Opens the edit session on `id`, replacing any other open session.
    pub fn start_edit(&self, id: i64) -> Result<EditSession, EditRejected> {
        let mut state = self.state.lock();
        let task = state.get(id).ok_or(EditRejected::NotFound(id))?;
        if task.completed {
            return Err(EditRejected::Completed(id));
        }

        let session = EditSession {
            task_id: id,
            text: task.text.clone(),
        };
        if let Some(previous) = state.editing.replace(session.clone())
            && previous.task_id != id
        {
            debug!(from = previous.task_id, to = id, "edit session moved");
        }
        Ok(session)
    }

    /// Updates the in-progress text. Returns false when no session is open.
    pub fn set_edit_text(&self, text: impl Into<String>) -> bool {
        match self.state.lock().editing.as_mut() {
            Some(session) => {
                session.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn cancel_edit(&self) {
        if let Some(session) = self.state.lock().editing.take() {
            debug!(id = session.task_id, "edit cancelled");
        }
    }

    /// Sends the session's text to the store. Blank text is ignored and the
    /// session stays open; a failed update also keeps it open.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn commit_edit(&self) -> Result<bool, ListError> {
        let session = {
            let state = self.state.lock();
            state.editing.clone()
        };
        let Some(session) = session else {
            return Ok(false);
        };
        let Some(text) = normalize_text(&session.text) else {
            debug!(id = session.task_id, "ignoring blank rename");
            return Ok(false);
        };
        let id = session.task_id;

        self.transact(
            Operation::Rename,
            self.policies.rename,
            |state| state.get(id).map(|_| text.clone()),
            |text| self.store.update(&self.table, id, TaskPatch::text(text)),
            |state, text| {
                if let Some(task) = state.get_mut(id) {
                    task.text = text.clone();
                }
                // A session reopened while the request was in flight stays.
                if state.editing.as_ref() == Some(&session) {
                    state.editing = None;
                }
            },
        )
        .await
    }

    async fn transact<P, Fut>(
        &self,
        op: Operation,
        policy: UpdatePolicy,
        plan: impl FnOnce(&ListState) -> Option<P>,
        remote: impl FnOnce(P) -> Fut,
        apply: impl Fn(&mut ListState, &P),
    ) -> Result<bool, ListError>
    where
        P: Clone,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        match policy {
            UpdatePolicy::Confirmed => {
                let planned = {
                    let state = self.state.lock();
                    plan(&state)
                };
                let Some(planned) = planned else {
                    debug!(op = %op, "nothing to do");
                    return Ok(false);
                };

                if let Err(err) = remote(planned.clone()).await {
                    return Err(self.fail(op, err));
                }

                let mut state = self.state.lock();
                apply(&mut state, &planned);
                let revision = state.bump();
                debug!(op = %op, revision, "confirmed change applied");
                Ok(true)
            }
            UpdatePolicy::Optimistic => {
                let speculative = {
                    let mut state = self.state.lock();
                    match plan(&state) {
                        Some(planned) => {
                            let snapshot = (state.tasks.clone(), state.editing.clone());
                            apply(&mut state, &planned);
                            let revision = state.bump();
                            Some((planned, snapshot, revision))
                        }
                        None => None,
                    }
                };
                let Some((planned, snapshot, revision)) = speculative else {
                    debug!(op = %op, "nothing to do");
                    return Ok(false);
                };
                debug!(op = %op, revision, "speculative change applied");

                let Err(err) = remote(planned).await else {
                    return Ok(true);
                };

                let rolled_back = {
                    let mut state = self.state.lock();
                    if state.revision == revision {
                        let (tasks, editing) = snapshot;
                        state.tasks = tasks;
                        state.editing = editing;
                        state.bump();
                        true
                    } else {
                        false
                    }
                };

                let failure = self.fail(op, err);
                if rolled_back {
                    debug!(op = %op, "rolled back speculative change");
                } else {
                    warn!(
                        op = %op,
                        revision,
                        "list changed while request was in flight; reloading"
                    );
                    // load reports its own failure.
                    let _ = self.load().await;
                }
                Err(failure)
            }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.tasks.clear();
        state.editing = None;
        state.bump();
    }

    fn fail(&self, op: Operation, err: StoreError) -> ListError {
        error!(op = %op, table = %self.table, error = %err, "remote call failed");
        let message = if err.is_relation_missing() {
            format!(
                "The `{}` table has not been set up yet. Run `tasklist init` to create it.",
                self.table
            )
        } else {
            format!("Could not {}. Please try again.", op.describe())
        };
        self.reporter.report(Notice::error(message));
        ListError::Store { op, source: err }
    }
}
