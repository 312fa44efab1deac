use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vshub_cache::{
  CompoundParams, Config, DataCache, DataGetter, EntityKind, FetchParams, HttpTransport,
  SqliteBackend,
};

#[derive(Parser, Debug)]
#[command(name = "vshub")]
#[command(about = "Cached command-line client for the VS-Hub concept set API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vshub/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch an entity, answering from the cache where possible
  Fetch {
    /// Entity type, by slice or endpoint name (e.g. concepts, get-csets)
    entity: String,
    /// Identity values for per-key entities
    keys: Vec<String>,
    /// Named parameter for compound-key entities, as name=v1,v2
    #[arg(short, long = "param")]
    params: Vec<String>,
  },
  /// Show the cache's event log
  History,
  /// Show per-slice entry counts and size
  Stats,
  /// Drop everything cached
  Purge,
  /// Purge the cache if the server has refreshed since it was filled
  RefreshCheck,
  /// Ask the server to refresh its database
  DbRefresh,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging()?;

  let backend = SqliteBackend::open_at(&config.storage_path()?)?;
  let cache = DataCache::new(Arc::new(backend), config.cache_options());
  let transport = HttpTransport::new(&config)?;
  tracing::debug!(api_root = %transport.base(), "Using API");
  let getter =
    DataGetter::new(cache.clone(), Arc::new(transport)).with_get_threshold(config.get_threshold);

  match args.command {
    Command::Fetch {
      entity,
      keys,
      params,
    } => {
      let kind: EntityKind = entity.parse().map_err(|e: String| eyre!(e))?;
      let params = fetch_params(keys, &params)?;
      let result = getter.fetch_and_cache(kind, params).await?;
      tracing::info!(
        entity = %kind,
        cached = result.plan.cached_keys.len(),
        fetched = result.plan.uncached_keys.len(),
        "fetch complete"
      );
      println!("{}", serde_json::to_string_pretty(&result.into_map())?);
    }
    Command::History => {
      for event in cache.history() {
        println!("{}  {}", event.timestamp.to_rfc3339(), event.message);
      }
    }
    Command::Stats => {
      let stats = cache.stats();
      for slice in &stats.slices {
        println!("{:<32} {:>8}", slice.name, slice.entries);
      }
      println!(
        "{} bytes uncompressed, {} history events",
        stats.serialized_bytes, stats.history_events
      );
      match cache.last_refresh_timestamp() {
        Some(ts) => println!("last server refresh: {}", ts),
        None => println!("last server refresh: unknown"),
      }
    }
    Command::Purge => {
      cache.purge();
      println!("cache purged");
    }
    Command::RefreshCheck => {
      if getter.check_for_server_refresh().await? {
        println!("server data is newer; cache purged");
      } else {
        println!("cache is current");
      }
    }
    Command::DbRefresh => {
      let response = getter.trigger_db_refresh().await?;
      println!("{}", serde_json::to_string_pretty(&response)?);
    }
  }

  cache.flush()?;
  Ok(())
}

/// Log to a daily file under the data directory. `VSHUB_LOG` sets the filter.
fn init_logging() -> Result<WorkerGuard> {
  let dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("vshub");
  std::fs::create_dir_all(&dir)?;

  let file_appender = tracing_appender::rolling::daily(dir, "vshub.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);
  let filter = EnvFilter::try_from_env("VSHUB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn fetch_params(keys: Vec<String>, params: &[String]) -> Result<FetchParams> {
  match (keys.is_empty(), params.is_empty()) {
    (true, true) => Ok(FetchParams::None),
    (false, true) => Ok(FetchParams::keys(keys)),
    (true, false) => {
      let mut compound = CompoundParams::new();
      for param in params {
        let (name, values) = param
          .split_once('=')
          .ok_or_else(|| eyre!("Expected name=v1,v2, got {}", param))?;
        compound = compound.with(
          name.trim(),
          values.split(',').map(str::trim).filter(|v| !v.is_empty()),
        );
      }
      Ok(compound.into())
    }
    (false, false) => Err(eyre!("Pass either keys or --param, not both")),
  }
}
