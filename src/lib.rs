//! aesdsocket: a line-oriented TCP append log server
//!
//! Each client sends bytes up to a newline. The server appends them to a
//! single on-disk log and replies with the whole log before closing the
//! connection. Clients are served strictly one after another.
//!
//! Features:
//! - Optional daemon mode (detach after bind, before listen)
//! - Graceful shutdown on SIGINT/SIGTERM, deleting the log
//! - Diagnostics to syslog or stderr
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod connection;
pub mod daemon;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod storage;
