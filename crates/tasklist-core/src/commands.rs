use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::cli::Command;
use crate::config::{Backend, Config, StoreSettings};
use crate::list::OrderedTaskList;
use crate::policy::Policies;
use crate::render::Renderer;
use crate::report::ConsoleReporter;
use crate::store::{MemoryStore, PgStore, RemoteStore};

enum OpenedStore {
    Postgres(PgStore),
    Memory(Arc<MemoryStore>),
}

impl OpenedStore {
    fn shared(&self) -> Arc<dyn RemoteStore> {
        match self {
            OpenedStore::Postgres(store) => Arc::new(store.clone()),
            OpenedStore::Memory(store) => store.clone(),
        }
    }
}

#[instrument(skip(settings), fields(backend = ?settings.backend, table = %settings.table))]
fn open_store(settings: &StoreSettings) -> anyhow::Result<OpenedStore> {
    match settings.backend {
        Backend::Postgres => {
            let url = settings
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("store.url is required for the postgres backend"))?;
            let store = PgStore::connect(url, settings.pool_size, settings.connect_timeout)
                .context("failed to configure postgres store")?;
            Ok(OpenedStore::Postgres(store))
        }
        Backend::Memory => {
            warn!("memory backend selected; changes are discarded on exit");
            Ok(OpenedStore::Memory(Arc::new(MemoryStore::provisioned(
                &settings.table,
            ))))
        }
    }
}

#[instrument(skip(cfg, settings, policies))]
pub async fn dispatch(
    cfg: &Config,
    settings: StoreSettings,
    policies: Policies,
    command: Command,
) -> anyhow::Result<()> {
    let renderer = Renderer::new(cfg)?;
    let opened = open_store(&settings)?;

    if command == Command::Init {
        match &opened {
            OpenedStore::Postgres(store) => store
                .provision(&settings.table)
                .await
                .with_context(|| format!("failed to provision table {}", settings.table))?,
            OpenedStore::Memory(store) => store.provision(&settings.table),
        }
        println!("Table `{}` is ready.", settings.table);
        return Ok(());
    }

    let mut list = OrderedTaskList::new(opened.shared())
        .with_table(settings.table.clone())
        .with_policies(policies);
    // `list --json` writes nothing but JSON to stdout.
    if command != (Command::List { json: true }) {
        list = list.with_reporter(Arc::new(ConsoleReporter));
    }

    list.load().await?;
    debug!(count = list.len(), "list loaded");

    match command {
        Command::Init | Command::List { json: false } => {}
        Command::List { json: true } => return renderer.print_json(&list.tasks()),
        Command::Add { text } => {
            let text = text.join(" ");
            if let Some(task) = list.insert(&text).await? {
                info!(id = task.id, "added task");
            }
        }
        Command::Toggle { id } => {
            if !list.toggle(id).await? {
                bail!("no task with id {id}");
            }
        }
        Command::Rename { id, text } => {
            list.start_edit(id)?;
            list.set_edit_text(text.join(" "));
            list.commit_edit().await?;
        }
        Command::Delete { id } => {
            if !list.delete(id).await? {
                bail!("no task with id {id}");
            }
        }
        Command::Move { id, target } => {
            for wanted in [id, target] {
                if list.get(wanted).is_none() {
                    bail!("no task with id {wanted}");
                }
            }
            list.reorder(id, Some(target)).await?;
        }
        Command::Clear => {
            list.clear_completed().await?;
        }
    }

    renderer.print_task_table(&list.tasks())
}
