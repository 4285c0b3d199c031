use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use encore_offline::cache::{CacheStorage, SqliteStorage};
use encore_offline::config::Config;
use encore_offline::host::LoggingHost;
use encore_offline::http::{Destination, Method, Request};
use encore_offline::net::ReqwestFetcher;
use encore_offline::{logging, InterceptionController};

type Controller = InterceptionController<SqliteStorage, ReqwestFetcher, LoggingHost>;

#[derive(Parser, Debug)]
#[command(name = "encore-offline")]
#[command(about = "Offline caching proxy for the Encore workshop app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/encore-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Deployed version to act as (overrides the config file)
  #[arg(long)]
  app_version: Option<String>,

  /// Write logs to a daily-rolled file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  /// Use a throwaway in-memory cache
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version's manifest and activate it
  Install,
  /// Fetch a URL through the proxy
  Fetch {
    url: Url,
    /// Treat the request as a full-page navigation
    #[arg(long)]
    navigate: bool,
    /// Declared resource kind (image, style, script, font, document)
    #[arg(long)]
    destination: Option<Destination>,
    #[arg(long, default_value = "GET")]
    method: Method,
    /// Extra request header as name:value
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Show which policy class a URL falls into
  Classify {
    url: Url,
    #[arg(long)]
    destination: Option<Destination>,
  },
  /// List cache generations and their entry counts
  Generations,
  /// Delete every generation outside the current version's allow-list
  Purge,
  /// Render a push payload
  Push { text: Option<String> },
  /// Simulate a notification click
  Click {
    #[arg(long, default_value = "push-1")]
    tag: String,
    action: Option<String>,
  },
  /// Deliver a background sync signal
  Sync { tag: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.log_dir.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  let config = if let Some(version) = args.app_version {
    Config { version, ..config }
  } else {
    config
  };

  let storage = if args.ephemeral {
    SqliteStorage::open_in_memory()?
  } else {
    SqliteStorage::open(&config.storage_path()?)?
  };
  let fetcher = ReqwestFetcher::new(config.origin_url()?)?;

  let mut controller = InterceptionController::new(
    &config,
    Arc::new(storage),
    Arc::new(fetcher),
    Arc::new(LoggingHost),
  )?;

  match args.command {
    Command::Install => install(&mut controller).await,
    Command::Fetch {
      url,
      navigate,
      destination,
      method,
      headers,
    } => {
      if !controller.restore()? {
        return Err(eyre!(
          "Version {} is not installed. Run `encore-offline install` first.",
          config.version
        ));
      }

      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      let mut request = request.with_method(method);
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must be name:value, got {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }

      fetch(&controller, &request).await
    }
    Command::Classify { url, destination } => {
      let mut request = Request::get(url);
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }
      match controller.classify(&request) {
        Some(class) => println!("{:?}", class),
        None => println!("not intercepted"),
      }
      Ok(())
    }
    Command::Generations => {
      let storage = controller.generations().storage();
      for name in storage.names()? {
        println!("{}\t{}", name, storage.entry_count(&name)?);
      }
      Ok(())
    }
    Command::Purge => {
      let generations = controller.generations();
      for name in generations.purge(&generations.allow_list())? {
        println!("deleted {}", name);
      }
      Ok(())
    }
    Command::Push { text } => {
      let payload = controller.push(text.as_deref().map(str::as_bytes))?;
      println!("{}", serde_json::to_string_pretty(&payload)?);
      Ok(())
    }
    Command::Click { tag, action } => controller.notification_click(&tag, action.as_deref()),
    Command::Sync { tag } => {
      if !controller.sync(&tag)? {
        println!("unknown background task {}", tag);
      }
      Ok(())
    }
  }
}

/// Install, then activate straight away: a command line host has no clients to wait for.
async fn install(controller: &mut Controller) -> Result<()> {
  controller.install().await?;
  controller.message("SKIP_WAITING")?;

  let generations = controller.generations();
  println!(
    "installed {} ({} assets)",
    generations.static_name(),
    generations.storage().entry_count(generations.static_name())?
  );
  Ok(())
}

async fn fetch(controller: &Controller, request: &Request) -> Result<()> {
  let Some(decision) = controller.fetch(request).await? else {
    println!("not intercepted");
    return Ok(());
  };

  let response = &decision.response.data;
  println!("{} ({:?})", response.status, decision.response.source);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", String::from_utf8_lossy(&response.body));

  // Give the cache write a chance to land before the process exits
  if let Some(population) = decision.population {
    population.await?;
  }

  Ok(())
}
