//! Server side WebSocket framing and connection supervision.
//!
//! A [Websocket] takes over an already upgraded byte stream, answers pings and
//! the closing handshake on its own, and closes the connection when the peer
//! goes silent for too long, as decided by its [TimeoutManager]. Every live
//! connection is visible through a [Registry], which never keeps one alive.
//!
//! ```no_run
//! use ws_supervisor::{CloseCode, Message, Websocket};
//! # async fn handle(stream: tokio::net::TcpStream) -> ws_supervisor::Result<()> {
//! let (ws, mut incoming) = Websocket::serve(stream);
//! while let Some(message) = incoming.recv().await {
//!     if let Message::Text(text) = message {
//!         ws.send(text)?;
//!     }
//! }
//! ws.close(CloseCode::Clean).ok();
//! # Ok(()) }
//! ```

mod close_code;
mod codec;
mod errors;
mod frame;
mod opcode;
mod registry;
mod timeout;
mod utils;
mod ws;

pub use close_code::*;
pub use codec::*;
pub use errors::{Error, Result};
pub use frame::*;
pub use opcode::*;
pub use registry::*;
pub use timeout::*;
pub use ws::*;
