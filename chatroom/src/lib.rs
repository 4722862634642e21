//! Multi-client chat broadcaster over plain TCP.
//!
//! Clients connect, state a display name, then exchange newline-delimited
//! text. Every line a client sends is stored by the server and pushed to all
//! other connected clients on their next broadcast cycle.
//!
//! - [`line`] sends and receives text lines, either draining what is already
//!   readable or waiting for a fixed number of lines (the handshake).
//! - [`store`] is the append-only message log shared by every session of one
//!   server, read through per-session cursors.
//! - [`session`] drives one accepted connection: handshake, then the
//!   drain-append-deliver cycle.
//! - [`server`] owns the listener, accepts with a bounded wait and spawns a
//!   session task per connection.
//! - [`task`] is the cooperative cancellation used by servers, sessions and
//!   clients alike.
//! - [`client`] and [`simulation`] speak the protocol from the other side and
//!   run whole fleets of servers and clients for a fixed time.
//! - [`cli`] and [`config`] hold the command line and runtime settings.
//!
//! Integration tests under `tests/` drive real servers over loopback TCP.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod line;
pub mod message;
pub mod server;
pub mod session;
pub mod simulation;
pub mod store;
pub mod task;
