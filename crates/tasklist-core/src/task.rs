use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task row as persisted by the remote store.
///
/// `id`, `created_at` and `updated_at` are owned by the store; the list
/// never fabricates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    pub order_index: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Payload for a remote insert. The store assigns the id and timestamps.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewTask {
    pub text: String,
    pub order_index: i32,
}

/// Partial update; `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i32>,
}

impl TaskPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn order_index(order_index: i32) -> Self {
        Self {
            order_index: Some(order_index),
            ..Self::default()
        }
    }

    /// Applies the patch to a local copy. Timestamps stay store-owned.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(text) = &self.text {
            task.text = text.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(order_index) = self.order_index {
            task.order_index = order_index;
        }
    }
}

/// Trims user input; blank text yields `None`.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
