//! Async IPC connection to mpv over a Unix domain socket.
//!
//! One reader task owns the read half of the socket and demultiplexes
//! everything that arrives on it: responses are routed to the caller
//! that issued the command via a per-request oneshot, events are fanned
//! out to every listener queue. A writer task serializes writes from
//! concurrent callers so two commands can never interleave on the wire.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_channel::Receiver;
use futures_util::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectFailed(std::io::Error),
  #[error("Malformed message: {0}")]
  Protocol(#[from] serde_json::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Connection closed")]
  Closed,
}

/// Pending request waiting for its response.
type PendingRequest = oneshot::Sender<Result<MpvResponse, IpcError>>;

/// Command table shared between callers and the reader task.
struct IpcState {
  pending: HashMap<u16, PendingRequest>,
  next_id: u16,
}

impl IpcState {
  fn new() -> Self {
    Self {
      pending: HashMap::new(),
      next_id: 1,
    }
  }

  /// Allocate a request ID and register a slot for its response.
  ///
  /// IDs cycle through 1..=65535, skipping any still in flight. 0 is
  /// reserved: mpv treats an async request with ID 0 as fire-and-forget
  /// and the caller would wait forever.
  fn register(&mut self) -> (u16, oneshot::Receiver<Result<MpvResponse, IpcError>>) {
    let (tx, rx) = oneshot::channel();
    loop {
      let id = self.next_id;
      self.next_id = if id == u16::MAX { 1 } else { id + 1 };
      if !self.pending.contains_key(&id) {
        self.pending.insert(id, tx);
        return (id, rx);
      }
    }
  }
}

/// Registry of event listener queues.
struct Fanout {
  listeners: HashMap<u64, async_channel::Sender<MpvEvent>>,
  next_key: u64,
}

impl Fanout {
  fn new() -> Self {
    Self {
      listeners: HashMap::new(),
      next_key: 0,
    }
  }
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
  Close,
}

/// IPC connection to mpv.
pub struct MpvIpc {
  state: Arc<Mutex<IpcState>>,
  fanout: Arc<Mutex<Fanout>>,
  write_tx: async_channel::Sender<WriteMessage>,
  cancel: CancellationToken,
  reader_handle: Mutex<Option<JoinHandle<()>>>,
  _writer_handle: JoinHandle<()>,
  command_timeout: Option<Duration>,
}

impl MpvIpc {
  /// Connect to the mpv IPC socket and start the reader/writer tasks.
  pub async fn connect(
    path: impl AsRef<Path>,
    command_timeout: Option<Duration>,
  ) -> Result<Self, IpcError> {
    let stream = UnixStream::connect(path.as_ref())
      .await
      .map_err(IpcError::ConnectFailed)?;
    let (reader, writer) = tokio::io::split(stream);

    let state = Arc::new(Mutex::new(IpcState::new()));
    let fanout = Arc::new(Mutex::new(Fanout::new()));
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();
    let cancel = CancellationToken::new();

    let reader_state = state.clone();
    let reader_fanout = fanout.clone();
    let reader_cancel = cancel.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, reader_state, reader_fanout, reader_cancel).await;
    });

    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
    });

    Ok(Self {
      state,
      fanout,
      write_tx,
      cancel,
      reader_handle: Mutex::new(Some(reader_handle)),
      _writer_handle: writer_handle,
      command_timeout,
    })
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<IpcState>>,
    fanout: Arc<Mutex<Fanout>>,
    cancel: CancellationToken,
  ) {
    log::debug!("mpv IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      let read = tokio::select! {
        _ = cancel.cancelled() => {
          log::debug!("mpv IPC reader cancelled");
          break;
        }
        read = buf_reader.read_line(&mut line) => read,
      };
      match read {
        Ok(0) => {
          log::debug!("mpv closed the connection");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              log::debug!("Received response ({}): {:?}", response.request_id, response);
              let tx = state.lock().pending.remove(&response.request_id);
              match tx {
                Some(tx) => {
                  let _ = tx.send(Ok(response));
                }
                None => {
                  log::warn!("Response for unknown request_id {}", response.request_id);
                }
              }
            }
            Ok(MpvMessage::Event(event)) => {
              log::debug!("Received event: {:?}", event);
              Self::broadcast(&fanout, event);
            }
            Err(e) => {
              // The stream framing can no longer be trusted after an
              // unparseable line; tear the whole connection down.
              log::error!("Malformed message from mpv, closing: {}: {}", e, trimmed);
              break;
            }
          }
        }
        Err(e) => {
          log::error!("mpv IPC read error: {}", e);
          break;
        }
      }
    }

    // Teardown: unblock every pending command, then end every listener
    // stream. Closing the queue still lets buffered events drain.
    let pending: Vec<PendingRequest> = {
      let mut state = state.lock();
      state.pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in pending {
      let _ = tx.send(Err(IpcError::Closed));
    }
    let listeners: Vec<async_channel::Sender<MpvEvent>> = {
      let mut fanout = fanout.lock();
      fanout.listeners.drain().map(|(_, tx)| tx).collect()
    };
    for tx in listeners {
      tx.close();
    }
    log::debug!("mpv IPC reader loop terminated");
  }

  /// Deliver an event to every registered listener queue.
  fn broadcast(fanout: &Mutex<Fanout>, event: MpvEvent) {
    // Snapshot under the lock, deliver outside it. Queues are unbounded
    // so try_send only fails for a listener that is going away.
    let targets: Vec<async_channel::Sender<MpvEvent>> =
      fanout.lock().listeners.values().cloned().collect();
    for tx in targets {
      let _ = tx.try_send(event.clone());
    }
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: async_channel::Receiver<WriteMessage>,
  ) {
    log::debug!("mpv IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Command(line) => {
          if let Err(e) = writer.write_all(&line).await {
            log::error!("mpv IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("mpv IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }

  /// Send a command to mpv and wait for the matching response.
  pub async fn send_command(&self, name: &str, params: &[Value]) -> Result<MpvResponse, IpcError> {
    let (request_id, rx) = self.state.lock().register();

    let cmd = MpvCommand::new(name, params, request_id);
    let line = cmd.encode()?;
    log::debug!(
      "Sending command ({}): {}",
      request_id,
      String::from_utf8_lossy(&line).trim_end()
    );

    if self.write_tx.send(WriteMessage::Command(line)).await.is_err() {
      self.state.lock().pending.remove(&request_id);
      return Err(IpcError::Closed);
    }

    match self.command_timeout {
      Some(limit) => match tokio::time::timeout(limit, rx).await {
        Ok(result) => result.unwrap_or(Err(IpcError::Closed)),
        Err(_) => {
          self.state.lock().pending.remove(&request_id);
          Err(IpcError::Timeout)
        }
      },
      None => rx.await.unwrap_or(Err(IpcError::Closed)),
    }
  }

  /// Register a new event listener.
  ///
  /// Every listener gets its own queue and sees every event received
  /// after this call, in arrival order, until the connection closes.
  pub fn listen(&self) -> EventListener {
    let (tx, rx) = async_channel::unbounded();
    let key = {
      let mut fanout = self.fanout.lock();
      let key = fanout.next_key;
      fanout.next_key += 1;
      fanout.listeners.insert(key, tx);
      key
    };
    EventListener {
      rx,
      key,
      fanout: self.fanout.clone(),
    }
  }

  /// Shut down the connection and wait for the reader loop to finish.
  ///
  /// Safe to call more than once; pending commands resolve with
  /// [`IpcError::Closed`] and listener streams end.
  pub async fn close(&self) {
    let _ = self.write_tx.send(WriteMessage::Close).await;
    self.cancel.cancel();
    let handle = self.reader_handle.lock().take();
    if let Some(handle) = handle {
      let _ = handle.await;
    }
  }

  /// Number of commands still waiting for a response.
  pub fn pending_commands(&self) -> usize {
    self.state.lock().pending.len()
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    // Backstop for callers that never ran close(): stop the reader so
    // it unblocks any remaining waiters instead of lingering.
    self.cancel.cancel();
  }
}

/// One subscription to the mpv event stream.
///
/// Ends (yields `None`) after the connection has closed and all events
/// buffered before closure were consumed. Dropping the listener
/// unregisters its queue.
pub struct EventListener {
  rx: Receiver<MpvEvent>,
  key: u64,
  fanout: Arc<Mutex<Fanout>>,
}

impl EventListener {
  /// Receive the next event.
  pub async fn recv(&mut self) -> Option<MpvEvent> {
    self.rx.recv().await.ok()
  }
}

impl Stream for EventListener {
  type Item = MpvEvent;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<MpvEvent>> {
    // SAFETY: `rx` is structurally pinned and never moved out of `self`.
    unsafe { self.map_unchecked_mut(|s| &mut s.rx) }.poll_next(cx)
  }
}

impl Drop for EventListener {
  fn drop(&mut self) {
    self.fanout.lock().listeners.remove(&self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_ids_cycle_from_one() {
    let mut state = IpcState::new();
    let (first, _rx1) = state.register();
    let (second, _rx2) = state.register();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
  }

  #[test]
  fn test_request_id_wraps_to_one_not_zero() {
    let mut state = IpcState::new();
    state.next_id = u16::MAX;
    let (last, _rx1) = state.register();
    assert_eq!(last, u16::MAX);
    state.pending.remove(&last);
    let (wrapped, _rx2) = state.register();
    assert_eq!(wrapped, 1);
  }

  #[test]
  fn test_register_skips_outstanding_ids() {
    let mut state = IpcState::new();
    let (one, _rx1) = state.register();
    assert_eq!(one, 1);
    // Force the counter back onto the outstanding ID.
    state.next_id = 1;
    let (next, _rx2) = state.register();
    assert_eq!(next, 2);
  }
}
