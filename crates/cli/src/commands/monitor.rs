//! The `monitor` command: run a session until interrupted

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use exposer::{
  config::Config,
  discovery::{DiscoveryFeed, DiscoveryQuery, UncoverFeed},
  session::{SessionDriver, SessionOptions},
  store::IndexStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::progress::SpinnerReporter;

pub struct MonitorArgs {
  pub query: String,
  pub engines: String,
  pub config: Option<PathBuf>,
  pub poll_interval: Option<u64>,
}

pub async fn cmd_monitor(args: MonitorArgs) -> Result<()> {
  let path = Config::resolve_path(args.config.as_deref())?;
  let mut config = Config::load(&path).context("Failed to load configuration")?;
  if let Some(secs) = args.poll_interval {
    config.session.poll_interval_secs = secs;
  }

  let query = DiscoveryQuery::parse(&args.query, &args.engines);
  if query.queries.is_empty() {
    bail!("At least one query is required");
  }

  let store = <dyn IndexStore>::from_config(&config.store).context("Failed to create index store client")?;
  let feed: Arc<dyn DiscoveryFeed> = Arc::new(UncoverFeed::new(&config.discovery));

  let mut driver = SessionDriver::start(store, feed, query, SessionOptions::starting_now(&config))
    .await
    .context("Failed to start monitoring session")?;

  let cancel = CancellationToken::new();
  spawn_shutdown_listener(cancel.clone());

  let mut reporter = SpinnerReporter::new();
  let stats = driver.run(&cancel, &mut reporter).await;
  reporter.finish(&stats);

  println!();
  println!("Index: {}", driver.index());
  println!("  Endpoints stored: {}", stats.created);
  println!("  Ports merged:     {}", stats.merged);
  if stats.failed > 0 {
    println!("  Failed events:    {}", stats.failed);
  }
  if stats.malformed > 0 {
    println!("  Malformed lines:  {}", stats.malformed);
  }
  println!("  Polling passes:   {}", stats.passes);

  Ok(())
}

/// Cancel `cancel` on ctrl-c or SIGTERM
fn spawn_shutdown_listener(cancel: CancellationToken) {
  tokio::spawn(async move {
    tokio::select! {
      result = signal::ctrl_c() => {
        if let Err(e) = result {
          warn!("Failed to listen for ctrl-c: {}", e);
          return;
        }
        info!("Received ctrl-c, shutting down...");
      }
      _ = terminate() => {
        info!("Received SIGTERM, shutting down...");
      }
    }
    cancel.cancel();
  });
}

#[cfg(unix)]
async fn terminate() {
  match signal::unix::signal(signal::unix::SignalKind::terminate()) {
    Ok(mut sigterm) => {
      sigterm.recv().await;
    }
    Err(e) => {
      warn!("Failed to listen for SIGTERM: {}", e);
      std::future::pending::<()>().await;
    }
  }
}

#[cfg(not(unix))]
async fn terminate() {
  std::future::pending::<()>().await;
}
