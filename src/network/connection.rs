//! Connection
//!
//! Owns the TCP socket to a single store node.

use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::protocol::{encode_command, read_reply, Command, Reply};

/// Smallest wait accepted by [`Connection::poll_reply`]
const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

/// A lazily established connection to one store node
///
/// One request is outstanding at a time: every command sent is answered by
/// exactly one reply, read in order. Subscription streams are the exception
/// and are read with [`Connection::read_reply`] / [`Connection::poll_reply`].
pub struct Connection {
    /// Store host name
    host: String,

    /// Store port
    port: u16,

    /// Socket read/write timeout
    timeout: Option<Duration>,

    /// Credential for AUTH
    password: Option<String>,

    /// Keyspace selected right after connecting
    db: i64,

    /// TCP stream reader (buffered for line reads)
    reader: Option<BufReader<TcpStream>>,

    /// TCP stream writer (buffered so a frame goes out in one write)
    writer: Option<BufWriter<TcpStream>>,
}

impl Connection {
    /// Create a connection handle. No I/O happens until the first command.
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            password: config.password.clone(),
            db: config.db,
            reader: None,
            writer: None,
        }
    }

    /// `host:port` of the node
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    /// Keyspace selected on (re)connect
    pub fn db(&self) -> i64 {
        self.db
    }

    /// Remember the keyspace to select on the next (re)connect
    pub fn set_db(&mut self, db: i64) {
        self.db = db;
    }

    /// Open the socket, authenticate and select the keyspace
    ///
    /// Does nothing when already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let addr = self.resolve()?;
        let stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| self.transport_error("connecting", e))?;

        // Disable Nagle's algorithm for low latency
        stream
            .set_nodelay(true)
            .and_then(|_| stream.set_read_timeout(self.timeout))
            .and_then(|_| stream.set_write_timeout(self.timeout))
            .map_err(|e| self.transport_error("configuring", e))?;

        let read_stream = stream
            .try_clone()
            .map_err(|e| self.transport_error("configuring", e))?;
        self.reader = Some(BufReader::new(read_stream));
        self.writer = Some(BufWriter::new(stream));

        tracing::debug!("Connected to {} ({})", self.addr(), addr);

        if let Some(password) = self.password.clone() {
            self.authenticate(&password)?;
        }

        let db = self.db;
        if let Err(e) = self.run_command(&Command::new("SELECT").arg(&db)) {
            self.disconnect();
            return Err(e);
        }
        tracing::trace!("Selected keyspace {} on {}", db, self.addr());

        Ok(())
    }

    /// Resolve the node address, preferring IPv4 over IPv6
    fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.transport_error("resolving", e))?
            .collect();
        addrs.sort_by_key(|a| if a.is_ipv4() { 0 } else { 1 });

        addrs.into_iter().next().ok_or_else(|| {
            CourierError::Transport(format!("No address found for {}", self.addr()))
        })
    }

    fn authenticate(&mut self, password: &str) -> Result<()> {
        match self.run_command(&Command::new("AUTH").arg(password)) {
            Ok(reply) if reply.is_truthy() => {
                tracing::debug!("Authenticated to {}", self.addr());
                Ok(())
            }
            Ok(_) => {
                self.disconnect();
                Err(CourierError::Authentication("Invalid password".to_string()))
            }
            Err(CourierError::Server(message)) => {
                self.disconnect();
                Err(CourierError::Authentication(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Close the socket. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let writer = self.writer.take();
        let reader = self.reader.take();

        if let Some(writer) = writer {
            // Shutdown errors on an already broken socket are expected
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            tracing::debug!("Disconnected from {}", self.addr());
        }
        drop(reader);
    }

    /// Encode and send one command, connecting first if needed
    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        self.connect()?;

        let bytes = encode_command(command);
        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_all(&bytes).and_then(|_| writer.flush()),
            None => return Err(self.not_connected()),
        };

        result.map_err(|e| {
            self.disconnect();
            self.transport_error("writing to", e)
        })
    }

    /// Decode exactly one reply
    ///
    /// A closed stream or an I/O failure drops the connection and surfaces as
    /// a transport error. Error replies are returned as [`Reply::Error`].
    pub fn read_reply(&mut self) -> Result<Reply> {
        let result = match self.reader.as_mut() {
            Some(reader) => read_reply(reader),
            None => return Err(self.not_connected()),
        };

        match result {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                self.disconnect();
                Err(CourierError::Transport(format!(
                    "Connection closed by {}",
                    self.addr()
                )))
            }
            Err(CourierError::Io(e)) => {
                self.disconnect();
                Err(self.transport_error("reading from", e))
            }
            Err(e) => {
                // The stream position is unknown after a malformed frame
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Send a command and read its reply
    ///
    /// An error reply from the store becomes [`CourierError::Server`].
    pub fn run_command(&mut self, command: &Command) -> Result<Reply> {
        self.send_command(command)?;
        match self.read_reply()? {
            Reply::Error(message) => Err(CourierError::Server(message)),
            reply => Ok(reply),
        }
    }

    /// Wait up to `wait` for a reply to start arriving
    ///
    /// Returns `Ok(None)` when nothing arrived. Once the first byte is there,
    /// the whole reply is decoded under the regular socket timeout.
    pub fn poll_reply(&mut self, wait: Duration) -> Result<Option<Reply>> {
        let timeout = self.timeout;
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(self.not_connected()),
        };

        if reader.buffer().is_empty() {
            let armed = reader.get_ref().set_read_timeout(Some(wait.max(MIN_POLL_WAIT)));
            let filled = armed.and_then(|_| reader.fill_buf().map(|buf| !buf.is_empty()));
            let restored = reader.get_ref().set_read_timeout(timeout);

            match filled.and_then(|ready| restored.map(|_| ready)) {
                Ok(true) => {}
                Ok(false) => {
                    self.disconnect();
                    return Err(CourierError::Transport(format!(
                        "Connection closed by {}",
                        self.addr()
                    )));
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => {
                    self.disconnect();
                    return Err(self.transport_error("reading from", e));
                }
            }
        }

        self.read_reply().map(Some)
    }

    fn not_connected(&self) -> CourierError {
        CourierError::Transport(format!("Not connected to {}", self.addr()))
    }

    fn transport_error(&self, action: &str, err: std::io::Error) -> CourierError {
        match err.raw_os_error() {
            Some(code) => CourierError::Transport(format!(
                "Error {} {} {}. {}.",
                code,
                action,
                self.addr(),
                err
            )),
            None => CourierError::Transport(format!("Error {} {}. {}.", action, self.addr(), err)),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
