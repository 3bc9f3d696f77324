//! Detach from the controlling terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::IntoRawFd;
use tracing::debug;

/// Turn the current process into a daemon.
///
/// The parent exits with success; only the child returns from this call.
/// Must run while the process is still single-threaded, after the listening
/// socket is bound so bind errors reach the invoking shell.
pub fn daemonize() -> io::Result<()> {
    // SAFETY: no other threads exist yet, so the child inherits a
    // consistent address space.
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => std::process::exit(0),
    }

    // SAFETY: plain syscalls with no pointer arguments.
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    unsafe { libc::umask(0) };

    std::env::set_current_dir("/")?;

    redirect_std_streams()?;
    debug!(pid = std::process::id(), "Detached from terminal");
    Ok(())
}

/// Point stdin, stdout and stderr at /dev/null.
fn redirect_std_streams() -> io::Result<()> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?
        .into_raw_fd();

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: fd is an open descriptor owned by this function.
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    if fd > libc::STDERR_FILENO {
        unsafe { libc::close(fd) };
    }
    Ok(())
}
