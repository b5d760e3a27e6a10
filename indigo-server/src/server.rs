use std::{
    io,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::Arc,
    thread,
    time::Duration,
};

use indigo_protocol::ParserOptions;

use crate::{
    Bus, Role,
    connection::{Connection, Outcome},
    peer::Peer,
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub parser: ParserOptions,
    /// TCP read and write timeout. `None` keeps idle connections open forever.
    pub read_write_timeout: Option<Duration>,
}

/// Serves INDIGO clients over TCP, one thread per connection.
#[derive(Debug)]
pub struct Server<T: Bus> {
    bus: Arc<T>,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use indigo_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .buffer_size(64 * 1024)
///     .rw_timeout(Duration::from_secs(20))
///     .build(my_bus);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the size of the read buffer of each connection.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.parser.buffer_size = size;
        self
    }

    /// Set the largest BLOB size a client may upload.
    pub fn max_blob_size(mut self, size: usize) -> Self {
        self.config.parser.max_blob_size = size;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = Some(timeout);
        self
    }

    /// Build and return the server
    pub fn build<T: Bus + 'static>(self, bus: T) -> Server<T> {
        Server::new(bus, self.config)
    }
}

impl<T: Bus + 'static> Server<T> {
    pub fn new(bus: T, config: Config) -> Server<T> {
        Server {
            bus: Arc::new(bus),
            config,
        }
    }

    pub fn bus(&self) -> &Arc<T> {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn listen(&self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        log::info!("Server listening on {}", listener.local_addr()?);
        self.serve(listener);
        Ok(())
    }

    /// Accepts connections from an already bound listener until it fails.
    pub fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    let bus = Arc::clone(&self.bus);
                    let config = self.config.clone();
                    let name = tcp
                        .peer_addr()
                        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
                    log::info!("New client connection from {}", name);
                    let spawned = thread::Builder::new()
                        .name(format!("indigo {}", name))
                        .spawn(move || handle_client(bus, &config, tcp));
                    if let Err(e) = spawned {
                        log::error!("Cannot serve {}: {}", name, e);
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }
}

/// Runs the connection loop for one client until it disconnects.
pub fn handle_client<B: Bus + ?Sized>(bus: Arc<B>, config: &Config, tcp: TcpStream) -> Outcome {
    let name = tcp
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    let prepared = tcp
        .set_read_timeout(config.read_write_timeout)
        .and_then(|()| tcp.set_write_timeout(config.read_write_timeout))
        .and_then(|()| tcp.try_clone());
    let output = match prepared {
        Ok(output) => output,
        Err(e) => {
            log::error!("Cannot set up connection to {}: {}", name, e);
            return Outcome::Closed;
        }
    };
    let peer = Arc::new(Peer::new(name, output));
    let connection = Connection::new(bus, Role::Client, tcp, Arc::clone(&peer), config.parser.clone());
    let outcome = connection.run();
    match &outcome {
        Outcome::Closed => log::info!("Client {} disconnected", peer.name()),
        Outcome::Aborted(e) => log::info!("Client {} dropped: {}", peer.name(), e),
    }
    outcome
}

#[cfg(test)]
mod test {
    use super::*;
    use indigo_protocol::{Message, PropertyRequest};
    use std::io::{BufRead, BufReader, Write};

    struct Echo;

    impl Bus for Echo {
        fn enumerate_properties(&self, peer: &Arc<Peer>, request: &PropertyRequest) {
            let message = Message::Notify {
                device: request.device.clone(),
                message: Some(format!("hello {}", peer.version())),
            };
            peer.send(&message).unwrap();
        }
    }

    #[test]
    fn builder_sets_options() {
        let server = Builder::new()
            .buffer_size(4096)
            .max_blob_size(1024)
            .rw_timeout(Duration::from_secs(5))
            .build(Echo);
        let config = server.config();
        assert_eq!(config.parser.buffer_size, 4096);
        assert_eq!(config.parser.max_blob_size, 1024);
        assert_eq!(config.read_write_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn serves_a_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(Echo, Config::default());
        thread::spawn(move || server.serve(listener));

        let mut tcp = TcpStream::connect(addr).unwrap();
        tcp.write_all(b"<getProperties version='1.7' switch='2.0'/>\n")
            .unwrap();
        let mut reader = BufReader::new(tcp.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "<switchProtocol version='2.0'/>\n");
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "<message message='hello 2.0'/>\n");
    }
}
