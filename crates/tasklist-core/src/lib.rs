pub mod cli;
pub mod commands;
pub mod config;
pub mod list;
pub mod ordering;
pub mod policy;
pub mod render;
pub mod report;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use crate::list::{
  EditRejected,
  EditSession,
  ListError,
  OrderedTaskList
};
pub use crate::policy::{
  Policies,
  UpdatePolicy
};
pub use crate::task::Task;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tasklist CLI"
  );
  debug!(overrides = pre.rc_overrides.len(), "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.tasklistrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let settings =
    config::StoreSettings::from_config(
      &cfg
    )
    .context(
      "failed to resolve store \
       settings"
    )?;
  let policies =
    policy::Policies::from_config(&cfg)?;

  let command = cli.command.unwrap_or(
    cli::Command::List { json: false }
  );

  // Operations interleave only at store
  // calls, so one thread is enough.
  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(commands::dispatch(
    &cfg, settings, policies, command
  ))?;

  info!("done");
  Ok(())
}
