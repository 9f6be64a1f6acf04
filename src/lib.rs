//! Async client for mpv's JSON IPC protocol.
//!
//! A single Unix-socket connection carries any number of concurrent
//! commands plus a live event feed. One background task reads the
//! socket and demultiplexes: responses go to the caller whose
//! `request_id` they carry, events are fanned out to every listener.
//!
//! Architecture:
//! - `protocol.rs` - JSON command/response/event types and wire framing
//! - `ipc.rs` - connection, demultiplexing reader task, event fan-out
//! - `client.rs` - high-level client with command and listen methods

mod client;
mod ipc;
mod protocol;

pub use client::{MpvClient, MpvError};
pub use ipc::{EventListener, IpcError};
pub use protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};
