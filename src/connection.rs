//! Per-connection receive/append/respond exchange.
//!
//! A connection is drained until a newline shows up in a received chunk or
//! the peer stops sending. Whatever was received is appended to the store as
//! a single write, then the whole store is streamed back and the socket is
//! closed.
//!
//! Message boundaries are chunk-granular: the chunk containing the first
//! newline is kept whole, so bytes that follow the newline in that same
//! chunk become part of the message rather than the start of the next one.
//!
//! A stop request ends receiving early: what arrived so far is appended and
//! answered like any other message, so shutdown never waits on an idle peer.

use crate::signals::{self, StopFlag};
use crate::storage::PersistentStore;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, error, info, trace, warn};

/// Byte that terminates a client message.
pub const DELIMITER: u8 = b'\n';

/// Errors that end or degrade a single exchange.
///
/// None of these stop the server; the accept loop moves on to the next client.
#[derive(Debug)]
pub enum ConnectionError {
    /// Reading from the client failed.
    Receive(io::Error),
    /// The accumulation buffer could not grow.
    BufferGrowth { requested: usize },
    /// Opening or writing the store for append failed.
    StoreAppend(io::Error),
    /// Opening or reading the store for the response failed.
    StoreRead(io::Error),
    /// Writing the response to the client failed.
    Send(io::Error),
    /// The client socket accepted fewer bytes than offered.
    ShortSend { sent: usize, expected: usize },
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Receive(e) => write!(f, "receive failed: {e}"),
            ConnectionError::BufferGrowth { requested } => {
                write!(f, "could not grow receive buffer by {requested} bytes")
            }
            ConnectionError::StoreAppend(e) => write!(f, "store append failed: {e}"),
            ConnectionError::StoreRead(e) => write!(f, "store read failed: {e}"),
            ConnectionError::Send(e) => write!(f, "send failed: {e}"),
            ConnectionError::ShortSend { sent, expected } => {
                write!(f, "short send: {sent} of {expected} bytes")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Position of the first delimiter in `chunk`, if any.
pub fn find_delimiter(chunk: &[u8]) -> Option<usize> {
    chunk.iter().position(|&b| b == DELIMITER)
}

/// A single accepted client.
///
/// Owns the socket; dropping the connection closes it.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    delimiter_found: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buffer: Vec::new(),
            delimiter_found: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes accumulated so far.
    pub fn message(&self) -> &[u8] {
        &self.buffer
    }

    pub fn delimiter_found(&self) -> bool {
        self.delimiter_found
    }

    /// Receive chunks until one contains the delimiter, the peer closes, or
    /// `stop` is raised while waiting for data.
    ///
    /// Every received chunk is appended in full, including any bytes after
    /// the delimiter. On error the bytes received so far stay in the buffer.
    pub fn receive(&mut self, chunk_size: usize, stop: StopFlag) -> Result<(), ConnectionError> {
        let mut chunk = vec![0u8; chunk_size];

        while !self.delimiter_found {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    trace!(peer = %self.peer, "Peer finished sending");
                    break;
                }
                Ok(n) => n,
                Err(e) if signals::is_interruption(&e) => {
                    if stop.is_set() {
                        debug!(peer = %self.peer, "Stop requested, ending receive");
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(ConnectionError::Receive(e)),
            };

            self.buffer
                .try_reserve(n)
                .map_err(|_| ConnectionError::BufferGrowth { requested: n })?;
            self.buffer.extend_from_slice(&chunk[..n]);
            self.delimiter_found = find_delimiter(&chunk[..n]).is_some();
        }

        Ok(())
    }

    /// Drop everything received so far.
    fn discard(&mut self) {
        self.buffer = Vec::new();
    }

    /// Stream the full store back to the peer in `chunk_size` pieces.
    ///
    /// Returns the number of bytes sent.
    /// An interrupted send is retried unless `stop` is raised, in which case
    /// the response is abandoned.
    pub fn respond(
        &mut self,
        store: &PersistentStore,
        chunk_size: usize,
        stop: StopFlag,
    ) -> Result<u64, ConnectionError> {
        let mut file = store.open_reader().map_err(ConnectionError::StoreRead)?;
        let mut chunk = vec![0u8; chunk_size];
        let mut total = 0u64;

        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::StoreRead(e)),
            };

            let sent = loop {
                match self.stream.write(&chunk[..n]) {
                    Ok(sent) => break sent,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted && !stop.is_set() => continue,
                    Err(e) => return Err(ConnectionError::Send(e)),
                }
            };
            if sent != n {
                return Err(ConnectionError::ShortSend { sent, expected: n });
            }
            total += n as u64;
        }

        Ok(total)
    }
}

/// Runs the receive/append/respond exchange for one connection at a time.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    store: PersistentStore,
    recv_chunk: usize,
    send_chunk: usize,
    stop: StopFlag,
}

impl ConnectionHandler {
    pub fn new(
        store: PersistentStore,
        recv_chunk: usize,
        send_chunk: usize,
        stop: StopFlag,
    ) -> Self {
        Self {
            store,
            recv_chunk,
            send_chunk,
            stop,
        }
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Serve one accepted connection to completion.
    ///
    /// Failures are logged and contained here. The socket is closed exactly
    /// once, when the connection is dropped at the end of this call.
    pub fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        info!("Accepted connection from {}", peer.ip());

        let mut conn = Connection::new(stream, peer);
        if let Err(e) = self.serve(&mut conn) {
            error!(peer = %peer, error = %e, "Connection aborted");
        }

        info!("Closed connection from {}", peer.ip());
    }

    fn serve(&self, conn: &mut Connection) -> Result<(), ConnectionError> {
        match conn.receive(self.recv_chunk, self.stop) {
            Ok(()) => {}
            Err(e @ ConnectionError::Receive(_)) => {
                warn!(peer = %conn.peer(), error = %e, "Receive ended early");
            }
            Err(e) => {
                conn.discard();
                return Err(e);
            }
        }

        if conn.message().is_empty() {
            debug!(peer = %conn.peer(), "Nothing received");
            return Ok(());
        }

        debug!(
            peer = %conn.peer(),
            bytes = conn.message().len(),
            delimited = conn.delimiter_found(),
            "Message received"
        );

        if let Err(e) = self
            .store
            .append(conn.message())
            .map_err(ConnectionError::StoreAppend)
        {
            error!(peer = %conn.peer(), error = %e, "Skipping append");
        }

        let sent = conn.respond(&self.store, self.send_chunk, self.stop)?;
        debug!(peer = %conn.peer(), bytes = sent, "Response sent");
        Ok(())
    }
}
