//! Multi-room text chat server.
//!
//! Clients connect over TCP, send a display name as their first line, and
//! land in the default room. From there they can create and join rooms, talk
//! to everyone in their room, or message one member privately. Every room
//! keeps an append-only history log on disk that is replayed to new joiners
//! and reloaded when the server restarts.
//!
//! - [`cli`] and [`config`] describe how the binary is started.
//! - [`server`] accepts connections and runs the name handshake and
//!   per-connection read loop.
//! - [`dispatcher`] executes parsed [`command`]s against the shared
//!   [`registry`], which owns room membership and in-memory history.
//! - [`history`] persists one log file per room.
//! - [`session`] and [`wire`] cover session identity and the newline
//!   framed text protocol.
//! - [`client`] is a small terminal client for the same protocol.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod registry;
pub mod server;
pub mod session;
pub mod wire;

pub use error::ChatError;
