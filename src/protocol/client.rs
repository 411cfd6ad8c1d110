use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

use log::{debug, info};

use crate::{Config, Message};

use super::{ProtocolTransport, TransportError, transport::shutdown_stream};

/// A persistent, half-duplex connection to a [`MessageServer`](super::MessageServer).
///
/// `send_message` takes `&mut self`, so one client carries at most one
/// outstanding request. Callers that need concurrency open one client each.
pub struct MessageClient {
    transport: Option<ProtocolTransport>,
    peer: SocketAddr,
}

impl MessageClient {
    pub fn connect<A: ToSocketAddrs>(address: A, config: &Config) -> Result<Self, TransportError> {
        config.validate()?;

        let stream = TcpStream::connect(address)?;
        let transport = ProtocolTransport::new(stream, config)?;
        let peer = transport.peer_addr();
        info!("connected to {peer}");

        Ok(Self {
            transport: Some(transport),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Sends `request` and blocks until the matching response has been decoded.
    ///
    /// Any failure tears the connection down; later calls fail with
    /// [`TransportError::ConnectionClosed`].
    pub fn send_message(&mut self, request: &Message) -> Result<Message, TransportError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        let result = transport
            .write_message(request)
            .and_then(|_| transport.read_message());

        match result {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.transport = None;
                debug!("{} closed the connection", self.peer);
                Err(TransportError::ConnectionClosed)
            }
            Err(e) => {
                self.transport = None;
                debug!("connection to {} failed: {e}", self.peer);
                if e.is_disconnect() {
                    Err(TransportError::ConnectionClosed)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Closes the connection. Disconnecting twice is a no-op.
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(transport) = self.transport.take() {
            info!("disconnecting from {}", self.peer);
            transport.shutdown()?;
        }
        Ok(())
    }

    /// Returns a handle that can close this connection from another thread.
    pub fn closer(&self) -> Result<Closer, TransportError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;

        Ok(Closer {
            stream: transport.try_clone_stream()?,
        })
    }
}

/// Closes a client's connection, failing any `send_message` parked on it.
#[derive(Debug)]
pub struct Closer {
    stream: TcpStream,
}

impl Closer {
    pub fn close(&self) -> io::Result<()> {
        shutdown_stream(&self.stream)
    }
}
