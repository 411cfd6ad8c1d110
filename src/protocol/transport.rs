use std::{
    io::{self, Read},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use log::{debug, trace};
use thiserror::Error;

use crate::{
    Config, ConfigError, Message, MessageError,
    buffer::{BufferReader, BufferWriter, bounded},
};

use super::{
    HandlerError,
    frame::{FrameError, FrameReader, write_frame},
};

const PUMP_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed message: {0}")]
    Message(#[from] MessageError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("handler failed: {0}")]
    Handler(HandlerError),
    #[error("connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// Whether the error means the peer or the local side tore the connection down.
    pub fn is_disconnect(&self) -> bool {
        let io = match self {
            TransportError::ConnectionClosed => return true,
            TransportError::Io(e) | TransportError::Frame(FrameError::Io(e)) => e,
            _ => return false,
        };

        matches!(
            io.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
        )
    }
}

type PumpError = Arc<Mutex<Option<io::Error>>>;

/// One framed connection.
///
/// A pump thread copies socket bytes into a bounded buffer while the owner of
/// the transport decodes frames from the other end. Writes go straight to the
/// socket. Dropping the transport shuts the socket down and joins the pump.
pub struct ProtocolTransport {
    stream: TcpStream,
    frames: Option<FrameReader<BufferReader>>,
    pump: Option<JoinHandle<()>>,
    pump_error: PumpError,
    max_frame_size: u32,
    peer: SocketAddr,
}

impl ProtocolTransport {
    pub fn new(stream: TcpStream, config: &Config) -> Result<Self, TransportError> {
        config.validate()?;

        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout)?;

        let source = stream.try_clone()?;
        let (sink, reader) = bounded(config.buffer_capacity);
        let pump_error = PumpError::default();

        let slot = Arc::clone(&pump_error);
        let pump = thread::Builder::new()
            .name(format!("courier-pump-{peer}"))
            .spawn(move || pump(source, sink, slot))?;

        Ok(Self {
            stream,
            frames: Some(FrameReader::new(reader, config.max_frame_size)),
            pump: Some(pump),
            pump_error,
            max_frame_size: config.max_frame_size,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the next message; `Ok(None)` means the peer closed between frames.
    pub fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        let frames = self
            .frames
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        match frames.read_frame() {
            Ok(Some(body)) => Ok(Some(Message::decode(&body)?)),
            Ok(None) => match self.take_pump_error() {
                Some(e) => Err(TransportError::Io(e)),
                None => Ok(None),
            },
            Err(e @ FrameError::Truncated { .. }) => Err(self
                .take_pump_error()
                .map_or(TransportError::Frame(e), TransportError::Io)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let body = message.encode()?;
        write_frame(&mut self.stream, &body, self.max_frame_size)?;
        Ok(())
    }

    /// Shuts both directions of the socket down, waking the pump.
    pub fn shutdown(&self) -> io::Result<()> {
        shutdown_stream(&self.stream)
    }

    pub(crate) fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    fn take_pump_error(&self) -> Option<io::Error> {
        self.pump_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for ProtocolTransport {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("failed to shut down connection to {}: {e}", self.peer);
        }
        // Releasing the reader fails any write the pump is parked on.
        drop(self.frames.take());
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                debug!("pump for {} panicked", self.peer);
            }
        }
    }
}

pub(crate) fn shutdown_stream(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
        _ => Ok(()),
    }
}

fn pump(mut source: TcpStream, mut sink: BufferWriter, error: PumpError) {
    let mut chunk = [0; PUMP_CHUNK_SIZE];

    loop {
        match source.read(&mut chunk) {
            Ok(0) => {
                trace!("stream ended");
                break;
            }
            Ok(n) => {
                if let Err(e) = sink.write(&chunk[..n]) {
                    trace!("discarding {n} bytes: {e}");
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("socket read failed: {e}");
                *error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                break;
            }
        }
    }

    sink.close();
}
