use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offline_cache::config::Config;
use offline_cache::worker::drain_notifications;
use offline_cache::{logging, Command, HttpFetcher, Notification, Request, SqliteStore, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

type AppWorker = Worker<SqliteStore, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "offline-cache")]
#[command(about = "Keep a web application's assets cached for offline use")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
  /// Populate the current generation, then delete stale generations
  Install,
  /// Check the cache against the manifest and fetch anything missing
  Verify,
  /// Show generations, readiness and missing resources
  Status,
  /// Run one request through the cache
  Fetch {
    /// URL or path, resolved against the configured scope
    url: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Read JSON commands from stdin, print notifications as JSON lines
  Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let store = SqliteStore::open_at(&config.storage_path()?)?;
  let fetcher = HttpFetcher::new(config.scope()?, config.request_timeout())?;
  let worker = Arc::new(Worker::new(config.worker_settings()?, store, fetcher));

  match args.action {
    Action::Install => install(&worker).await,
    Action::Verify => verify(&worker).await,
    Action::Status => status(&worker).await,
    Action::Fetch { url, output } => fetch(&worker, &url, output).await,
    Action::Listen => listen(&worker).await,
  }
}

async fn install(worker: &AppWorker) -> Result<()> {
  worker.start().await?;
  println!(
    "Cache {} ready ({} resources)",
    worker.controller().generation(),
    worker.controller().manifest().len()
  );
  Ok(())
}

async fn verify(worker: &AppWorker) -> Result<()> {
  let notification = worker.handle_command(Command::VerifyCache).await;
  println!("{}", serde_json::to_string(&notification)?);

  match notification.error() {
    Some(error) => Err(eyre!("Cache is not ready: {}", error)),
    None => Ok(()),
  }
}

async fn status(worker: &AppWorker) -> Result<()> {
  worker.resume().await?;
  let status = worker.controller().status().await?;

  println!("generation:  {}", status.generation);
  println!("state:       {:?}", status.state);
  println!("stored:      {}", status.stored);
  println!("generations: {}", status.generations.join(", "));
  if status.missing.is_empty() {
    println!("missing:     none");
  } else {
    println!("missing:");
    for url in &status.missing {
      println!("  {}", url);
    }
  }
  Ok(())
}

async fn fetch(worker: &AppWorker, target: &str, output: Option<PathBuf>) -> Result<()> {
  worker.resume().await?;
  let url = worker.controller().manifest().resolve(target)?;

  let result = worker.fetch(Request::get(url.clone())).await?;
  worker.controller().flush().await;

  eprintln!(
    "{} {} ({:?}, {} bytes)",
    result.response.status,
    url,
    result.source,
    result.response.body.len()
  );

  match output {
    Some(path) => tokio::fs::write(&path, &result.response.body)
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => {
      let mut stdout = tokio::io::stdout();
      stdout.write_all(&result.response.body).await?;
      stdout.flush().await?;
    }
  }
  Ok(())
}

async fn listen(worker: &Arc<AppWorker>) -> Result<()> {
  worker.resume().await?;

  let mut notifications = worker.subscribe();
  let (commands, message_loop) = worker.spawn_message_loop();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    tokio::select! {
      line = lines.next_line() => {
        let Some(line) = line? else { break };
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<Command>() {
          Ok(command) => {
            if commands.send(command).is_err() {
              break;
            }
          }
          Err(e) => warn!(error = %e, "ignoring message"),
        }
      }
      received = notifications.recv() => print_notification(received)?,
    }
  }

  // Let queued commands finish, then flush what they produced
  drop(commands);
  message_loop.await?;
  for notification in drain_notifications(&mut notifications) {
    print_notification(Ok(notification))?;
  }
  Ok(())
}

fn print_notification(received: Result<Notification, RecvError>) -> Result<()> {
  match received {
    Ok(notification) => println!("{}", serde_json::to_string(&notification)?),
    Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped notifications"),
    Err(RecvError::Closed) => return Err(eyre!("Notification channel closed")),
  }
  Ok(())
}
