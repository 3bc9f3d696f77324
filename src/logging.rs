//! Diagnostic output.
//!
//! Events are produced with `tracing` everywhere in the crate. This module
//! installs the `tracing-subscriber` formatter and, for the syslog target,
//! hands every formatted event to `syslog(3)` with a priority derived from
//! the event level.

use crate::config::LogTarget;
use std::ffi::{CStr, CString};
use std::io;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Handle to the installed logging sink.
///
/// Must be closed once at process exit so the syslog connection is released.
#[derive(Debug)]
pub struct LogHandle {
    target: LogTarget,
}

impl LogHandle {
    /// Release the logging resource.
    pub fn close(self) {
        if self.target == LogTarget::Syslog {
            // SAFETY: closelog has no preconditions.
            unsafe { libc::closelog() };
        }
    }
}

/// Install the global subscriber.
///
/// `ident` is the syslog identifier. It must be `'static` because
/// openlog keeps the pointer for the lifetime of the connection.
pub fn init(level: &str, target: LogTarget, ident: &'static CStr) -> LogHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match target {
        LogTarget::Syslog => {
            // SAFETY: ident is a static NUL-terminated string.
            unsafe {
                libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_CONS, libc::LOG_USER)
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(SyslogMakeWriter)
                .with_ansi(false)
                .with_level(false)
                .with_target(false)
                .without_time()
                .init();
        }
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
        }
    }

    LogHandle { target }
}

/// Map a tracing level onto a syslog priority.
fn priority(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        _ => libc::LOG_DEBUG,
    }
}

struct SyslogMakeWriter;

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(priority(meta.level()))
    }
}

/// Collects one formatted event and submits it on drop.
struct SyslogWriter {
    priority: libc::c_int,
    line: Vec<u8>,
}

impl SyslogWriter {
    fn new(priority: libc::c_int) -> Self {
        Self {
            priority,
            line: Vec::with_capacity(256),
        }
    }
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        let message = syslog_message(std::mem::take(&mut self.line));
        if message.as_bytes().is_empty() {
            return;
        }
        // SAFETY: both pointers are valid NUL-terminated strings and the
        // format consumes exactly one string argument.
        unsafe { libc::syslog(self.priority, c"%s".as_ptr(), message.as_ptr()) };
    }
}

/// Strip the trailing newline and interior NULs the formatter may produce.
fn syslog_message(mut line: Vec<u8>) -> CString {
    while line.last() == Some(&b'\n') {
        line.pop();
    }
    line.retain(|&b| b != 0);
    // Interior NULs were removed above.
    CString::new(line).unwrap_or_default()
}
