mod config;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use offsync::{
  BearerToken, ConnectivityProbe, DomainClient, LocalStore, NetworkMonitor, OfflineContext,
  OfflineError, PassOutcome, Remote, ReqwestTransport, RequestDescriptor,
};

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first client for a REST API with queued writes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Act as if the network were unreachable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queue and local data
  Status,
  /// Replay queued writes now
  Sync,
  /// GET a path through the offline layer
  Fetch {
    /// Path relative to api.base_url
    path: String,
    /// Cache key (default: the full URL)
    #[arg(long)]
    cache_key: Option<String>,
  },
  /// Send a write; queued when offline
  Send {
    method: String,
    path: String,
    /// JSON body
    #[arg(long)]
    body: Option<String>,
  },
  /// List queued writes
  Queue,
  /// Refresh every collection for offline use
  Preload,
  /// Drop cached and collected data (queued writes are kept)
  Reset,
  /// Probe connectivity and sync on reconnect until Ctrl-C
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let store_path = config.store_path()?;
  let log_dir = store_path
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  let _log_guard = init_logging(&config, &log_dir)?;

  let store = Arc::new(LocalStore::open(&store_path)?);
  let remote = Remote::new(
    Arc::new(ReqwestTransport::new()?),
    Arc::new(BearerToken::from_env(&config.api.token_env)),
  );
  let monitor = NetworkMonitor::new(false);

  let mut ctx = OfflineContext::new(store, remote.clone(), monitor.clone())
    .with_cache_ttl(config.cache_ttl()?);
  let client = DomainClient::new(ctx.router().clone(), &config.api.base_url)?;
  let health_url = client.url(&config.api.health_path)?;

  if !args.offline {
    monitor.set_online(remote.is_reachable(&health_url).await);
  }
  info!(online = monitor.is_online(), command = ?args.command, "Starting");

  match args.command {
    Command::Status => print_status(&ctx, &client)?,
    Command::Sync => match ctx.sync_data().await? {
      PassOutcome::Completed(report) => println!(
        "Replayed {}/{} queued writes ({} still pending)",
        report.succeeded,
        report.total,
        report.failed.len()
      ),
      PassOutcome::Skipped(reason) => println!("Sync skipped: {:?}", reason),
    },
    Command::Fetch { path, cache_key } => {
      let url = client.url(&path)?;
      let key = cache_key.unwrap_or_else(|| url.clone());
      let fetched = ctx
        .router()
        .request(RequestDescriptor::get(url), Some(&key))
        .await?;
      if let Some(cached_at) = fetched.cached_at {
        eprintln!("(offline data cached at {})", cached_at.to_rfc3339());
      }
      println!("{}", serde_json::to_string_pretty(&fetched.data)?);
    }
    Command::Send { method, path, body } => {
      let mut request = RequestDescriptor::new(&method, client.url(&path)?);
      if let Some(body) = body {
        let body: Value =
          serde_json::from_str(&body).map_err(|e| eyre!("--body is not valid JSON: {}", e))?;
        request = request.with_json(&body);
      }
      match ctx.router().request(request, None).await {
        Ok(fetched) => println!("{}", serde_json::to_string_pretty(&fetched.data)?),
        Err(OfflineError::OfflineUncached { queued_id, .. }) => {
          println!("Offline: queued as #{}", queued_id)
        }
        Err(e) => return Err(e.into()),
      }
    }
    Command::Queue => {
      let entries = ctx.queue().list()?;
      if entries.is_empty() {
        println!("Queue is empty");
      }
      for entry in entries {
        println!(
          "#{:<4} {:<6} {}  (queued {}, retries {})",
          entry.id,
          entry.request.method,
          entry.request.url,
          entry.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          entry.retry_count
        );
      }
    }
    Command::Preload => {
      client.preload().await;
      print_status(&ctx, &client)?;
    }
    Command::Reset => {
      ctx.reset()?;
      println!(
        "Local data cleared; {} queued writes kept",
        ctx.queue().len()?
      );
    }
    Command::Watch => {
      if args.offline {
        return Err(eyre!("watch needs the network; drop --offline"));
      }
      watch(&mut ctx, remote, monitor, health_url, &config).await?;
    }
  }

  Ok(())
}

fn init_logging(config: &Config, log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)?;
  let appender = tracing_appender::rolling::never(log_dir, "offsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log.level))?;
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn print_status(ctx: &OfflineContext, client: &DomainClient) -> Result<()> {
  let state = ctx.state()?;
  let summary = client.cached_summary()?;

  println!("online:       {}", state.online);
  println!("pending:      {}", state.pending_changes);
  match state.last_sync {
    Some(at) => println!("last sync:    {}", at.to_rfc3339()),
    None => println!("last sync:    never"),
  }
  println!("disciplines:  {}", summary.disciplines);
  println!("topics:       {}", summary.topics);
  println!("assignments:  {}", summary.assignments);
  println!("achievements: {}", summary.achievements);
  println!("user data:    {}", summary.user_data);
  println!(
    "cached:       {} ({} past expiry)",
    summary.cache_entries, summary.expired_cache_entries
  );
  Ok(())
}

async fn watch(
  ctx: &mut OfflineContext,
  remote: Remote,
  monitor: NetworkMonitor,
  health_url: String,
  config: &Config,
) -> Result<()> {
  let _probe = ConnectivityProbe::spawn(
    monitor.clone(),
    remote,
    health_url,
    config.probe_interval(),
  );
  ctx.start();

  // Queued while a previous run was offline
  if monitor.is_online() {
    ctx.sync_data().await?;
  }

  let mut transitions = monitor.subscribe();
  let mut status = ctx.watch_sync();
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  println!(
    "Watching ({}), {} pending. Ctrl-C to stop.",
    if monitor.is_online() { "online" } else { "offline" },
    ctx.queue().len()?
  );

  loop {
    tokio::select! {
      _ = &mut shutdown => break,
      Some(transition) = transitions.recv() => println!("{:?}", transition),
      Ok(()) = status.changed() => {
        let current = status.borrow_and_update().clone();
        if !current.syncing {
          if let Some(at) = current.last_sync {
            println!(
              "Synced at {}, {} pending",
              at.format("%H:%M:%S"),
              ctx.queue().len()?
            );
          }
        }
      }
    }
  }

  ctx.dispose();
  Ok(())
}
