pub mod alert;
pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod interval;
pub mod render;
pub mod store;
pub mod task;
pub mod timeline;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::alert::{
  AlertLog,
  TracingNotifier
};
use crate::store::TaskStore;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting quill CLI"
  );
  debug!(?pre.overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.quillrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre
      .overrides
      .into_iter()
      .chain(cli.overrides)
      .map(|rc| (rc.key, rc.value))
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let api =
    datastore::JsonlTaskApi::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open task file in \
         {}",
        data_dir.display()
      )
    })?;

  let mut store = TaskStore::new(
    api,
    (
      AlertLog::new(),
      TracingNotifier
    )
  )
  .with_policy(cfg.rollback_policy());

  let renderer =
    render::Renderer::new(&cfg);
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let outcome = match store.load() {
    | Ok(count) => {
      debug!(count, "task list ready");
      commands::dispatch(
        &mut store,
        &cfg,
        &renderer,
        inv,
        Utc::now()
      )
    }
    | Err(err) => {
      Err(anyhow::Error::new(err)
        .context(format!(
          "failed to load tasks from {}",
          store.api().tasks_path.display()
        )))
    }
  };

  renderer.print_alerts(
    store.notifier().0.alerts()
  )?;
  outcome?;

  info!("done");
  Ok(())
}
