//! Command-line control of mpv via socket IPC.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures_util::FutureExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use mpvctl::{MpvClient, MpvError};

#[derive(Parser)]
#[command(name = "mpvctl", about = "control mpv via socket IPC", version)]
struct Cli {
  /// mpv JSON IPC socket to connect to
  #[arg(long, default_value = "/tmp/mpvsocket")]
  socket: PathBuf,

  /// Select the log level (overridden by RUST_LOG)
  #[arg(long, default_value = "info")]
  log: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Toggle pause/play
  #[command(visible_alias = "toggle")]
  TogglePause,
  /// Load files (or URLs) to play
  Loadfile {
    /// Files (or URLs) to play
    #[arg(required = true)]
    file: Vec<String>,
    /// Append file(s) to the current playlist instead of replacing it
    #[arg(long, short)]
    append: bool,
  },
  /// Show the current playlist
  Playlist,
  /// Monitor mpv events
  Monitor {
    /// Monitor this property (may be specified multiple times)
    #[arg(long = "property", short, value_name = "PROPERTY")]
    properties: Vec<String>,
  },
  /// Read mpv properties
  GetProperty {
    #[arg(required = true, value_name = "PROPERTY")]
    properties: Vec<String>,
  },
  /// Set an mpv property
  SetProperty {
    property: String,
    value: String,
  },
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
    )
    .init();

  let client = MpvClient::new(&cli.socket);
  let result = client
    .with_connection(|m| run(m, &cli.command).boxed())
    .await;

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("mpvctl: {}", e);
      ExitCode::FAILURE
    }
  }
}

async fn run(m: &MpvClient, command: &Commands) -> Result<(), MpvError> {
  match command {
    Commands::TogglePause => m.cycle("pause").await,
    Commands::Loadfile { file, append } => load_files(m, file, *append).await,
    Commands::Playlist => playlist(m).await,
    Commands::Monitor { properties } => monitor(m, properties).await,
    Commands::GetProperty { properties } => get_properties(m, properties).await,
    Commands::SetProperty { property, value } => m.set_property(property, value.as_str()).await,
  }
}

async fn load_files(m: &MpvClient, files: &[String], append: bool) -> Result<(), MpvError> {
  for (i, file) in files.iter().enumerate() {
    // The first file replaces the playlist unless --append was given;
    // the rest always append.
    m.loadfile(file, append || i > 0).await?;
  }
  Ok(())
}

async fn playlist(m: &MpvClient) -> Result<(), MpvError> {
  let response = m.command("get_property", &["playlist".into()]).await?;
  let entries = response.data.as_ref().and_then(Value::as_array);
  for entry in entries.into_iter().flatten() {
    let current = entry
      .get("current")
      .and_then(Value::as_bool)
      .unwrap_or(false);
    let filename = entry.get("filename").and_then(Value::as_str).unwrap_or("");
    println!("{} {}", if current { "*" } else { " " }, filename);
  }
  Ok(())
}

async fn monitor(m: &MpvClient, properties: &[String]) -> Result<(), MpvError> {
  for (i, property) in properties.iter().enumerate() {
    m.observe_property(i as i64 + 1, property).await?;
  }
  let mut events = m.listen()?;
  while let Some(event) = events.recv().await {
    let json = serde_json::to_string(&event).map_err(mpvctl::IpcError::Protocol)?;
    println!("Received {} event: {}", event.event, json);
  }
  Ok(())
}

async fn get_properties(m: &MpvClient, properties: &[String]) -> Result<(), MpvError> {
  let fetches = properties.iter().map(|property| async move {
    let response = m.command("get_property", &[property.as_str().into()]).await?;
    Ok::<_, MpvError>((property.clone(), response.data.unwrap_or(Value::Null)))
  });
  let results = futures_util::future::try_join_all(fetches).await?;
  let output = Value::Object(results.into_iter().collect());
  println!(
    "{}",
    serde_json::to_string_pretty(&output).map_err(mpvctl::IpcError::Protocol)?
  );
  Ok(())
}
