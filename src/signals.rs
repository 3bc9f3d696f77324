//! Stop flag and SIGINT/SIGTERM handling.
//!
//! The handler only stores into an atomic. Everything else happens in the
//! accept loop once it sees the flag.
//!
//! Blocking socket calls come back early either with `EINTR` when a signal
//! lands mid-call, or after [`WAKEUP_INTERVAL`] through the socket receive
//! timeout. The timeout covers a signal that arrives just before the call
//! blocks.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest a blocked receive or accept goes without re-checking the flag.
pub const WAKEUP_INTERVAL: Duration = Duration::from_millis(500);

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_sig: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

/// Shared shutdown flag. Moves from unset to set once and never back.
#[derive(Debug, Clone, Copy)]
pub struct StopFlag(&'static AtomicBool);

impl StopFlag {
    /// A flag not connected to any signal handler.
    #[cfg(test)]
    pub fn detached() -> Self {
        StopFlag(Box::leak(Box::new(AtomicBool::new(false))))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Request shutdown from regular code.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A blocking call returned early without failing: interrupted by a signal
/// or woken by the receive timeout.
pub fn is_interruption(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Install the handler for SIGINT and SIGTERM.
///
/// `SA_RESTART` is not set, so a blocked `accept` returns `EINTR` and the
/// accept loop sees the flag immediately.
pub fn install() -> io::Result<StopFlag> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the action is fully initialised before use and the
        // handler only performs an atomic store.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(sig, &action, std::ptr::null_mut()) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(StopFlag(&STOP))
}
