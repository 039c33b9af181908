//! Topic-based publish/subscribe over plain TCP.
//!
//! Clients open with a `ROLE:TOPIC` handshake. Publishers then send
//! `TOPIC:CONTENT` lines and the server forwards each one to every subscriber
//! currently registered on that topic.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`protocol`] holds the text wire format and the chunked message reader.
//! - [`registry`] tracks admitted connections behind a single lock.
//! - [`router`] fans publications out to matching subscribers.
//! - [`session`] runs the per-connection state machine.
//! - [`server`] accepts TCP connections and spawns one session per client.
//! - [`client`] connects to a server, multiplexing stdin and server messages
//!   for a terminal user.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
