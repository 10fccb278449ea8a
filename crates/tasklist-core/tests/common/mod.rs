#![allow(dead_code)]

use std::sync::Arc;

use tasklist_core::report::CollectingReporter;
use tasklist_core::store::{MemoryStore, StoreOp};
use tasklist_core::{OrderedTaskList, Policies};

pub const TABLE: &str = "todos";

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub reporter: Arc<CollectingReporter>,
    pub list: OrderedTaskList,
}

impl Fixture {
    pub fn ids(&self) -> Vec<i64> {
        self.list.tasks().iter().map(|t| t.id).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.list.tasks().iter().map(|t| t.text.clone()).collect()
    }

    pub fn indices(&self) -> Vec<i32> {
        self.list.tasks().iter().map(|t| t.order_index).collect()
    }
}

/// Seeds `texts` as ids `1..` with order `0..` and loads them. The store has
/// seen exactly one `List` call on return.
pub async fn loaded(texts: &[&str]) -> Fixture {
    loaded_with(texts, Policies::default()).await
}

pub async fn loaded_with(texts: &[&str], policies: Policies) -> Fixture {
    let store = Arc::new(MemoryStore::provisioned(TABLE));
    store.seed_texts(TABLE, texts);
    let reporter = Arc::new(CollectingReporter::new());
    let list = OrderedTaskList::new(store.clone())
        .with_reporter(reporter.clone())
        .with_table(TABLE)
        .with_policies(policies);
    list.load().await.expect("initial load");

    Fixture {
        store,
        reporter,
        list,
    }
}

/// Yields until the store has seen `count` calls of `op`.
pub async fn wait_for_calls(store: &MemoryStore, op: StoreOp, count: usize) {
    while store.calls(op) < count {
        tokio::task::yield_now().await;
    }
}
