//! Final cleanup.

use crate::logging::LogHandle;
use crate::server::{Server, StartupError};
use crate::storage::PersistentStore;
use tracing::{error, info};

/// Exit status after a stop-flag shutdown.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit status after a fatal startup error.
pub const EXIT_FAILURE: u8 = 1;

/// Tears the process down. Consumed by [`Shutdown::finish`], so it runs once.
pub struct Shutdown {
    store: PersistentStore,
    log: Option<LogHandle>,
}

impl Shutdown {
    pub fn new(store: PersistentStore, log: Option<LogHandle>) -> Self {
        Self { store, log }
    }

    /// Close the listening socket, delete the store, release logging and
    /// return the process exit status.
    ///
    /// `server` is `None` when startup failed before a socket existed.
    pub fn finish(self, server: Option<Server>, outcome: Result<(), StartupError>) -> u8 {
        let status = match outcome {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                error!(error = %e, "Fatal startup error");
                EXIT_FAILURE
            }
        };

        // Connections are owned by the handler and already closed by now.
        drop(server);

        match self.store.remove() {
            Ok(removed) => info!(removed, path = %self.store.path().display(), "Store cleaned up"),
            Err(e) => error!(error = %e, path = %self.store.path().display(), "Failed to remove store"),
        }

        if let Some(log) = self.log {
            log.close();
        }
        status
    }
}
