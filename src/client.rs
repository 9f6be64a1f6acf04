//! High-level mpv client.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::ipc::{EventListener, IpcError, MpvIpc};
use crate::protocol::MpvResponse;

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("mpv command failed: {0}")]
  Command(String),
  #[error("Not connected to mpv")]
  NotConnected,
  #[error("Already connected to mpv")]
  AlreadyConnected,
}

/// Client for an mpv instance listening on a JSON IPC socket.
///
/// All methods take `&self`; commands may be issued from any number of
/// tasks concurrently over the one connection.
pub struct MpvClient {
  path: PathBuf,
  command_timeout: Option<Duration>,
  ipc: Mutex<Option<Arc<MpvIpc>>>,
}

impl MpvClient {
  /// Create a client for the socket at `path`. Does not connect yet.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      command_timeout: None,
      ipc: Mutex::new(None),
    }
  }

  /// Fail commands that mpv has not answered within `timeout`.
  ///
  /// Without this, a command waits until the connection closes, which
  /// matches mpv's own semantics for long-running commands.
  pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
    self.command_timeout = Some(timeout);
    self
  }

  /// Connect to the socket and start the reader task.
  pub async fn connect(&self) -> Result<(), MpvError> {
    if self.ipc.lock().is_some() {
      return Err(MpvError::AlreadyConnected);
    }
    let ipc = MpvIpc::connect(&self.path, self.command_timeout).await?;
    *self.ipc.lock() = Some(Arc::new(ipc));
    Ok(())
  }

  /// Close the connection and wait for the reader task to finish.
  ///
  /// No-op when already disconnected. Pending commands resolve with
  /// [`IpcError::Closed`] and active listeners end cleanly.
  pub async fn close(&self) {
    let ipc = self.ipc.lock().take();
    if let Some(ipc) = ipc {
      ipc.close().await;
    }
  }

  /// Check if connected.
  pub fn is_connected(&self) -> bool {
    self.ipc.lock().is_some()
  }

  /// Number of commands still waiting for a response.
  ///
  /// Zero when disconnected; every completed command removes its table
  /// entry, so this drains back to zero between calls.
  pub fn pending_commands(&self) -> usize {
    self
      .ipc
      .lock()
      .as_ref()
      .map_or(0, |ipc| ipc.pending_commands())
  }

  fn get_ipc(&self) -> Result<Arc<MpvIpc>, MpvError> {
    self.ipc.lock().clone().ok_or(MpvError::NotConnected)
  }

  /// Connect, run `f` against this client, and close again.
  ///
  /// The connection is closed whether `f` succeeds or fails, so no
  /// caller has to remember the teardown.
  pub async fn with_connection<'a, T, F>(&'a self, f: F) -> Result<T, MpvError>
  where
    F: FnOnce(&'a MpvClient) -> BoxFuture<'a, Result<T, MpvError>>,
  {
    self.connect().await?;
    let result = f(self).await;
    self.close().await;
    result
  }

  /// Issue a command and wait for its response.
  ///
  /// A response whose `error` field is not `"success"` is returned as
  /// [`MpvError::Command`]; that failure is local to this call and
  /// leaves the connection usable.
  pub async fn command(&self, name: &str, params: &[Value]) -> Result<MpvResponse, MpvError> {
    let ipc = self.get_ipc()?;
    let response = ipc.send_command(name, params).await?;

    if !response.is_success() {
      return Err(MpvError::Command(response.error));
    }

    Ok(response)
  }

  /// Subscribe to mpv events.
  ///
  /// Each call gets an independent stream; it ends when the connection
  /// closes. Drop the listener to unsubscribe early.
  pub fn listen(&self) -> Result<EventListener, MpvError> {
    Ok(self.get_ipc()?.listen())
  }

  /// Load a file or URL, replacing the playlist or appending to it.
  ///
  /// A location with a URL scheme is passed through untouched; a bare
  /// path is made absolute since mpv resolves paths against its own
  /// working directory, not ours.
  pub async fn loadfile(&self, location: &str, append: bool) -> Result<MpvResponse, MpvError> {
    let target = if Url::parse(location).is_ok() {
      location.to_string()
    } else {
      absolute_path(location).to_string_lossy().into_owned()
    };

    let mut params: Vec<Value> = vec![target.into()];
    if append {
      params.push("append".into());
    }
    self.command("loadfile", &params).await
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<Option<Value>, MpvError> {
    let response = self.command("get_property", &[name.into()]).await?;
    Ok(response.data)
  }

  /// Set a property value.
  pub async fn set_property(
    &self,
    name: &str,
    value: impl Into<Value>,
  ) -> Result<(), MpvError> {
    self
      .command("set_property", &[name.into(), value.into()])
      .await?;
    Ok(())
  }

  /// Cycle (toggle) a property.
  pub async fn cycle(&self, name: &str) -> Result<(), MpvError> {
    self.command("cycle", &[name.into()]).await?;
    Ok(())
  }

  /// Observe a property for changes.
  ///
  /// Changes arrive as "property-change" events on [`MpvClient::listen`]
  /// streams, tagged with `observer_id`.
  pub async fn observe_property(&self, observer_id: i64, name: &str) -> Result<(), MpvError> {
    self
      .command("observe_property", &[observer_id.into(), name.into()])
      .await?;
    Ok(())
  }
}

/// Resolve a possibly relative path against the current directory.
fn absolute_path(location: &str) -> PathBuf {
  let path = Path::new(location);
  if path.is_absolute() {
    return path.to_path_buf();
  }
  match std::env::current_dir() {
    Ok(dir) => dir.join(path),
    Err(e) => {
      log::debug!("Cannot resolve current directory: {}", e);
      path.to_path_buf()
    }
  }
}
