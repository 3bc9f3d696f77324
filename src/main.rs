//! aesdsocket server binary
//!
//! Startup order: signal handlers, bind, optional daemonize, listen, then the
//! accept loop. Every path out of here goes through `Shutdown::finish`.

use aesdsocket::config::Config;
use aesdsocket::daemon;
use aesdsocket::logging;
use aesdsocket::server::{Server, StartupError};
use aesdsocket::shutdown::{Shutdown, EXIT_FAILURE};
use aesdsocket::signals;
use aesdsocket::storage::PersistentStore;
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("aesdsocket: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    // Initialize logging
    let log = logging::init(&config.log_level, config.log_target, c"aesdsocket");

    info!(
        listen = %config.listen,
        store = %config.store_path.display(),
        daemon = config.daemon,
        "Starting aesdsocket server"
    );

    let shutdown = Shutdown::new(PersistentStore::new(&config.store_path), Some(log));

    let status = match start(&config) {
        Ok(server) => {
            server.run();
            shutdown.finish(Some(server), Ok(()))
        }
        Err((server, e)) => shutdown.finish(server, Err(e)),
    };
    ExitCode::from(status)
}

/// Bring the server up to the listening state.
///
/// On failure the server is handed back, if it was created, so shutdown can
/// close it.
fn start(config: &Config) -> Result<Server, (Option<Server>, StartupError)> {
    let stop = signals::install().map_err(|e| (None, StartupError::Signals(e)))?;

    let server = Server::bind(config, stop).map_err(|e| (None, e))?;

    if server.daemon() {
        if let Err(e) = daemon::daemonize() {
            return Err((Some(server), StartupError::Daemonize(e)));
        }
    }

    if let Err(e) = server.listen(config.backlog) {
        return Err((Some(server), e));
    }

    Ok(server)
}
