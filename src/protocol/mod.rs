//! Client-server request/response protocol.
//!
//! This module carries [`Message`](crate::Message) values between a
//! [`MessageClient`] and a [`MessageServer`] over TCP. A client holds one
//! persistent connection and issues one request at a time; the server hands
//! every accepted connection to a dedicated worker thread, which decodes each
//! request, passes it to the registered [`Handler`] and writes the response
//! back before reading the next request.
//!
//! # Binary Format
//!
//! Every message travels as one frame:
//!
//! - a 4-byte big-endian unsigned length prefix,
//! - the encoded message body, exactly `length` bytes long.
//!
//! A prefix above the configured `max_frame_size` is a protocol error and the
//! connection is closed before any body bytes are buffered.
//!
//! # Connection lifecycle
//!
//! Each side of a connection is a [`ProtocolTransport`]: a pump thread moves
//! socket bytes into a bounded [`buffer`](crate::buffer) and the owning thread
//! decodes frames from it. Protocol errors, transport errors and handler errors
//! all close the affected connection only; the server keeps accepting.
//! Stopping the server or disconnecting the client shuts the socket down,
//! which wakes any thread blocked on it.
//!
//! # Key Components
//!
//! - [`MessageServer`]: Accept loop plus per-connection workers.
//! - [`MessageClient`]: Blocking, half-duplex caller.
//! - [`Handler`]: Request to response mapping supplied by the server's owner.
//! - [`ProtocolTransport`]: Framed message I/O over one socket.
mod client;
pub mod frame;
mod handler;
mod server;
mod transport;

pub use client::{Closer, MessageClient};
pub use handler::{Echo, Handler, HandlerError};
pub use server::MessageServer;
pub use transport::{ProtocolTransport, TransportError};
