//! # wirecall
//!
//! Lightweight RPC over ZeroMQ sockets with MessagePack framing.
//!
//! A [`Server`] exposes named handlers; a [`Client`] invokes them
//! synchronously ([`Client::call`]), asynchronously with a token-correlated
//! callback ([`Client::async_call`]), or subscribes to named events
//! published by the server ([`Client::register_event`]).
//!
//! ## Architecture
//!
//! Three logical channels, conventionally on loopback ports 5555-5557:
//!
//! - **Request/reply** (ROUTER <- DEALER): `[client_id][empty][payload]`
//!   frames; replies return on the same socket in request order.
//! - **Async results** (PUB -> SUB): single-frame publications filtered by
//!   the calling client's identity; correlated to the issuing call by a
//!   UUID token and delivered on the client's poller thread.
//! - **Events** (PUB -> SUB): single-frame broadcast fan-out by event name.
//!
//! Payloads are concatenations of self-describing MessagePack values in
//! positional order; see [`protocol`] for the exact shapes and
//! [`error::ErrorCode`] for the stable wire error codes.
//!
//! ## Example
//!
//! ```no_run
//! use wirecall::{Client, Endpoints, Server};
//!
//! # fn main() -> wirecall::Result<()> {
//! let endpoints = Endpoints::default();
//! let mut server = Server::bind(endpoints.clone())?;
//! server.register_method("add_integer", |x: i32, y: i32| x + y);
//! let handle = server.handle();
//! std::thread::spawn(move || server.serve());
//!
//! let client = Client::connect(endpoints)?;
//! let sum: i32 = client.call("add_integer", (-1, -2))?;
//! assert_eq!(sum, -3);
//!
//! handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;

pub use client::Client;
pub use error::{Error, ErrorCode, Result};
pub use handler::{Callback, EventControl, Registry};
pub use server::{Server, ServerHandle};
pub use transport::Endpoints;
