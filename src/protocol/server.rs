use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, trace, warn};

use crate::Config;

use super::{Handler, ProtocolTransport, TransportError, transport::shutdown_stream};

#[derive(Default)]
struct Shared {
    stopping: AtomicBool,
    connections: Mutex<HashMap<u64, TcpStream>>,
}

impl Shared {
    fn connections(&self) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a connection from the registry when its worker exits, panics included.
struct Registration {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.connections().remove(&self.id);
    }
}

/// Serves framed requests with one dedicated worker thread per connection.
pub struct MessageServer {
    address: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl MessageServer {
    /// Binds `address` and starts accepting connections in the background.
    pub fn start<A, H>(address: A, handler: H, config: Config) -> Result<Self, TransportError>
    where
        A: ToSocketAddrs,
        H: Handler,
    {
        config.validate()?;

        let listener = TcpListener::bind(address)?;
        let address = listener.local_addr()?;
        info!("listening at {address}");

        let shared = Arc::new(Shared::default());
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("courier-accept".to_string())
                .spawn(move || accept_loop(listener, shared, handler, config))?
        };

        Ok(Self {
            address,
            shared,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn active_connections(&self) -> usize {
        self.shared.connections().len()
    }

    /// Stops accepting, closes every active connection and waits for the workers.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        info!("stopping server at {}", self.address);

        {
            let connections = self.shared.connections();
            self.shared.stopping.store(true, Ordering::SeqCst);
            for (id, stream) in connections.iter() {
                if let Err(e) = shutdown_stream(stream) {
                    debug!("failed to close connection {id}: {e}");
                }
            }
        }

        wake_and_join(acceptor, wake_address(self.address));
    }
}

/// Unparks the acceptor from accept() with a throwaway connection and waits for it.
///
/// Returns `false` without joining when the wake-up connection fails, leaving
/// the acceptor detached.
fn wake_and_join(acceptor: JoinHandle<()>, wake: SocketAddr) -> bool {
    if let Err(e) = TcpStream::connect(wake) {
        error!("failed to wake accept loop at {wake}, detaching it: {e}");
        return false;
    }
    if acceptor.join().is_err() {
        warn!("accept loop panicked");
    }
    true
}

impl Drop for MessageServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wake_address(address: SocketAddr) -> SocketAddr {
    match address.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), address.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), address.port())
        }
        _ => address,
    }
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    handler: Arc<dyn Handler>,
    config: Config,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0u64;

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                if shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
                warn!("broken connection: {e:?}");
                continue;
            }
        };

        let id = next_id;
        next_id += 1;

        {
            let mut connections = shared.connections();
            if shared.stopping.load(Ordering::SeqCst) {
                break;
            }
            match stream.try_clone() {
                Ok(clone) => {
                    connections.insert(id, clone);
                }
                Err(e) => {
                    warn!("failed to register connection {id}: {e}");
                    continue;
                }
            }
        }

        let registration = Registration {
            id,
            shared: Arc::clone(&shared),
        };
        let handler = Arc::clone(&handler);
        let config = config.clone();

        let spawned = thread::Builder::new()
            .name(format!("courier-conn-{id}"))
            .spawn(move || {
                let _registration = registration;
                match serve_connection(id, stream, handler.as_ref(), &config) {
                    Ok(()) => debug!("connection {id} closed"),
                    Err(e) => warn!("connection {id} dropped: {e}"),
                }
            });

        match spawned {
            Ok(worker) => workers.push(worker),
            Err(e) => warn!("failed to spawn worker for connection {id}: {e}"),
        }
        workers.retain(|worker| !worker.is_finished());
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("connection worker panicked");
        }
    }
    debug!("accept loop finished");
}

fn serve_connection(
    id: u64,
    stream: TcpStream,
    handler: &dyn Handler,
    config: &Config,
) -> Result<(), TransportError> {
    let mut transport = ProtocolTransport::new(stream, config)?;
    debug!("connection {id} accepted from {}", transport.peer_addr());

    loop {
        let Some(request) = transport.read_message()? else {
            return Ok(());
        };
        trace!("connection {id}: request with {} fields", request.len());

        let response = handler.handle(request).map_err(TransportError::Handler)?;
        transport.write_message(&response)?;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        time::Duration,
    };

    use crate::{
        Message,
        protocol::{Echo, frame::write_frame},
    };

    use super::*;

    fn expect_closed(stream: &mut TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut rest = Vec::new();
        match stream.read_to_end(&mut rest) {
            Ok(_) => assert!(rest.is_empty(), "unexpected response bytes"),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }
    }

    fn wait_for_connections(server: &MessageServer, expected: usize) {
        for _ in 0..200 {
            if server.active_connections() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "expected {expected} connections, found {}",
            server.active_connections()
        );
    }

    #[test]
    fn echoes_raw_frames() {
        let server = MessageServer::start("127.0.0.1:0", Echo, Config::default()).unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();

        let mut request = Message::new();
        request.put_string(Some("hello"));
        let body = request.encode().unwrap();
        write_frame(&mut stream, &body, 1024).unwrap();

        let mut prefix = [0; 4];
        stream.read_exact(&mut prefix).unwrap();
        let mut response = vec![0; u32::from_be_bytes(prefix) as usize];
        stream.read_exact(&mut response).unwrap();

        assert_eq!(response, body);
        server.stop();
    }

    #[test]
    fn oversized_length_prefix_closes_connection() {
        let config = Config::default().with_max_frame_size(1024);
        let server = MessageServer::start("127.0.0.1:0", Echo, config).unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(&[0xff, 0xff, 0xff, 0xff]).unwrap();

        expect_closed(&mut stream);
        server.stop();
    }

    #[test]
    fn garbage_body_closes_connection() {
        let server = MessageServer::start("127.0.0.1:0", Echo, Config::default()).unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        write_frame(&mut stream, &[99, 1, 2, 3], 1024).unwrap();

        expect_closed(&mut stream);
        server.stop();
    }

    #[test]
    fn handler_error_closes_only_that_connection() {
        let handler = |mut request: Message| -> Result<Message, crate::HandlerError> {
            match request.get_bool()? {
                true => Ok(request),
                false => Err("refused".into()),
            }
        };
        let server = MessageServer::start("127.0.0.1:0", handler, Config::default()).unwrap();

        let mut healthy = TcpStream::connect(server.local_addr()).unwrap();
        let mut failing = TcpStream::connect(server.local_addr()).unwrap();

        let mut refused = Message::new();
        refused.put_bool(false);
        write_frame(&mut failing, &refused.encode().unwrap(), 1024).unwrap();
        expect_closed(&mut failing);

        let mut accepted = Message::new();
        accepted.put_bool(true);
        let body = accepted.encode().unwrap();
        write_frame(&mut healthy, &body, 1024).unwrap();

        let mut frame = vec![0; 4 + body.len()];
        healthy.read_exact(&mut frame).unwrap();
        assert_eq!(&frame[4..], &body[..]);

        server.stop();
    }

    #[test]
    fn stop_closes_idle_connections() {
        let server = MessageServer::start("127.0.0.1:0", Echo, Config::default()).unwrap();

        let mut first = TcpStream::connect(server.local_addr()).unwrap();
        let mut second = TcpStream::connect(server.local_addr()).unwrap();
        wait_for_connections(&server, 2);

        server.stop();

        expect_closed(&mut first);
        expect_closed(&mut second);
    }

    #[test]
    fn finished_connections_are_released() {
        let server = MessageServer::start("127.0.0.1:0", Echo, Config::default()).unwrap();

        let stream = TcpStream::connect(server.local_addr()).unwrap();
        wait_for_connections(&server, 1);

        drop(stream);
        wait_for_connections(&server, 0);
    }

    #[test]
    fn bind_failure_is_reported() {
        let server = MessageServer::start("127.0.0.1:0", Echo, Config::default()).unwrap();

        assert!(matches!(
            MessageServer::start(server.local_addr(), Echo, Config::default()),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn idle_connection_times_out() {
        let config = Config::default().with_read_timeout(Some(Duration::from_millis(50)));
        let server = MessageServer::start("127.0.0.1:0", Echo, config).unwrap();

        let mut idle = TcpStream::connect(server.local_addr()).unwrap();
        expect_closed(&mut idle);

        wait_for_connections(&server, 0);
        server.stop();
    }

    #[test]
    fn failed_wake_does_not_join() {
        let unreachable = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (release, parked) = std::sync::mpsc::channel::<()>();
        let acceptor = thread::spawn(move || {
            let _ = parked.recv();
        });

        assert!(!wake_and_join(acceptor, unreachable));
        drop(release);
    }

    #[test]
    fn wake_address_prefers_loopback() {
        let any: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(wake_address(any), "127.0.0.1:4000".parse().unwrap());

        let bound: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        assert_eq!(wake_address(bound), bound);
    }
}
