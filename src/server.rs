//! TCP server accepting one client at a time.
//!
//! The listening socket is created and bound in [`Server::bind`], put into
//! listening state separately with [`Server::listen`] (so the process can
//! daemonize in between), and then driven by [`Server::run`], which hands
//! every accepted connection to the [`ConnectionHandler`] synchronously.
//! The next `accept` only happens after the current exchange is finished,
//! which keeps each client's append+read pair from interleaving with
//! another client's.

use crate::config::Config;
use crate::connection::ConnectionHandler;
use crate::signals::{self, StopFlag};
use crate::storage::PersistentStore;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use tracing::{error, info, warn};

/// Startup steps whose failure ends the process.
#[derive(Debug)]
pub enum StartupError {
    Signals(io::Error),
    Socket(io::Error),
    Bind(io::Error),
    StaleStore(io::Error),
    Daemonize(io::Error),
    Listen(io::Error),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Signals(e) => write!(f, "signal handler install failed: {e}"),
            StartupError::Socket(e) => write!(f, "socket setup failed: {e}"),
            StartupError::Bind(e) => write!(f, "socket bind failed: {e}"),
            StartupError::StaleStore(e) => write!(f, "could not remove stale store: {e}"),
            StartupError::Daemonize(e) => write!(f, "daemonize failed: {e}"),
            StartupError::Listen(e) => write!(f, "listen failed: {e}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Server instance.
///
/// Holds the listening socket, the stop flag and the daemon-mode setting.
pub struct Server {
    listener: Socket,
    stop: StopFlag,
    daemon: bool,
    handler: ConnectionHandler,
}

impl Server {
    /// Create the listening socket and bind it to the configured address.
    ///
    /// A store left behind by an earlier unclean exit is removed so every run
    /// starts empty. A failed bind leaves it alone.
    pub fn bind(config: &Config, stop: StopFlag) -> Result<Self, StartupError> {
        let listener = create_socket(config.listen)?;

        let store = PersistentStore::new(&config.store_path);
        if store.remove().map_err(StartupError::StaleStore)? {
            warn!(path = %store.path().display(), "Removed stale store");
        }

        Ok(Server {
            listener,
            stop,
            daemon: config.daemon,
            handler: ConnectionHandler::new(store, config.recv_chunk, config.send_chunk, stop),
        })
    }

    /// Start accepting connections into a queue of `backlog` entries.
    pub fn listen(&self, backlog: i32) -> Result<(), StartupError> {
        self.listener.listen(backlog).map_err(StartupError::Listen)?;
        match self.local_addr() {
            Ok(address) => info!(address = %address, daemon = self.daemon, "Server listening"),
            Err(_) => info!(daemon = self.daemon, "Server listening"),
        }
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an inet address"))
    }

    pub fn daemon(&self) -> bool {
        self.daemon
    }

    pub fn store(&self) -> &PersistentStore {
        self.handler.store()
    }

    /// Accept and serve connections until the stop flag is raised.
    pub fn run(&self) {
        while !self.stop.is_set() {
            let (socket, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if signals::is_interruption(&e) => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let Some(peer) = addr.as_socket() else {
                warn!("Dropping connection with non-inet peer address");
                continue;
            };
            // Receives wake up periodically too, so an idle client cannot
            // hold off shutdown.
            if let Err(e) = socket.set_read_timeout(Some(signals::WAKEUP_INTERVAL)) {
                error!(peer = %peer, error = %e, "Failed to set receive timeout");
                continue;
            }
            let stream: TcpStream = socket.into();
            self.handler.handle(stream, peer);
        }

        info!("Caught signal, exiting");
    }
}

/// Create a blocking TCP socket with SO_REUSEADDR bound to `addr`.
fn create_socket(addr: SocketAddr) -> Result<Socket, StartupError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(StartupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(StartupError::Socket)?;
    socket
        .set_read_timeout(Some(signals::WAKEUP_INTERVAL))
        .map_err(StartupError::Socket)?;
    socket.bind(&addr.into()).map_err(StartupError::Bind)?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogTarget;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use std::thread;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            daemon: false,
            listen: "127.0.0.1:0".parse().unwrap(),
            backlog: 10,
            store_path: dir.path().join("data"),
            recv_chunk: 1024,
            send_chunk: 1024,
            log_level: "info".to_string(),
            log_target: LogTarget::Stderr,
        }
    }

    fn start(config: &Config) -> (Arc<Server>, StopFlag, thread::JoinHandle<()>) {
        let stop = StopFlag::detached();
        let server = Arc::new(Server::bind(config, stop).unwrap());
        server.listen(config.backlog).unwrap();

        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || runner.run());
        (server, stop, handle)
    }

    /// Raise the flag and wait for the loop to notice it on its next wakeup.
    fn stop(flag: StopFlag, handle: thread::JoinHandle<()>) {
        flag.raise();
        handle.join().unwrap();
    }

    fn send(addr: SocketAddr, message: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(message).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    }

    #[test]
    fn test_fresh_store_echo() {
        let dir = tempfile::tempdir().unwrap();
        let (server, flag, handle) = start(&test_config(&dir));

        let addr = server.local_addr().unwrap();
        assert_eq!(send(addr, b"hello\n"), b"hello\n");

        stop(flag, handle);
    }

    #[test]
    fn test_sequential_clients_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let (server, flag, handle) = start(&test_config(&dir));
        let addr = server.local_addr().unwrap();

        let mut expected = Vec::new();
        for k in 0..8 {
            let message = format!("message {k}\n");
            expected.extend_from_slice(message.as_bytes());
            assert_eq!(send(addr, message.as_bytes()), expected);
        }

        stop(flag, handle);
    }

    #[test]
    fn test_stop_flag_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (server, flag, handle) = start(&test_config(&dir));

        let started = std::time::Instant::now();
        stop(flag, handle);
        assert!(started.elapsed() < signals::WAKEUP_INTERVAL * 4);
        assert!(!server.store().path().exists());
    }

    #[test]
    fn test_stale_store_removed_on_bind() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::write(&config.store_path, b"left over\n").unwrap();

        let (server, flag, handle) = start(&config);
        assert_eq!(send(server.local_addr().unwrap(), b"new\n"), b"new\n");

        stop(flag, handle);
    }

    #[test]
    fn test_slow_client_not_cut_off_by_wakeup() {
        let dir = tempfile::tempdir().unwrap();
        let (server, flag, handle) = start(&test_config(&dir));

        let mut stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        stream.write_all(b"slow ").unwrap();
        thread::sleep(signals::WAKEUP_INTERVAL * 2);
        stream.write_all(b"client\n").unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"slow client\n");

        stop(flag, handle);
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let first = Server::bind(&config, StopFlag::detached()).unwrap();
        first.listen(config.backlog).unwrap();

        let mut taken = config.clone();
        taken.listen = first.local_addr().unwrap();
        let err = Server::bind(&taken, StopFlag::detached()).err().unwrap();
        assert!(matches!(err, StartupError::Bind(_)));
        assert!(err.to_string().starts_with("socket bind failed"));
    }

    #[test]
    fn test_unremovable_stale_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        // remove_file cannot delete a directory
        std::fs::create_dir(&config.store_path).unwrap();

        let err = Server::bind(&config, StopFlag::detached()).err().unwrap();
        assert!(matches!(err, StartupError::StaleStore(_)));
        assert!(err.to_string().starts_with("could not remove stale store"));
    }

    #[test]
    fn test_socket_setup_is_its_own_phase() {
        let err = StartupError::Socket(io::Error::from_raw_os_error(libc::EMFILE));
        assert!(err.to_string().starts_with("socket setup failed"));
        assert!(!matches!(err, StartupError::Bind(_)));
    }

    #[test]
    fn test_idle_client_does_not_block_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (server, flag, handle) = start(&test_config(&dir));

        let mut client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        client.write_all(b"part").unwrap();
        thread::sleep(signals::WAKEUP_INTERVAL);

        stop(flag, handle);
        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"part");
    }
}
