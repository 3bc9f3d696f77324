//! writer: write a string to a file, logging to syslog.

use aesdsocket::config::LogTarget;
use aesdsocket::logging;
use clap::Parser;
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "writer")]
#[command(about = "Write a string to a file", long_about = None)]
struct Args {
    /// File to create or overwrite
    file: PathBuf,

    /// Content to write, taken byte for byte
    content: OsString,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log = logging::init("debug", LogTarget::Syslog, c"writer");

    debug!(
        "Writing {} to {}",
        args.content.to_string_lossy(),
        args.file.display()
    );
    let status = match write_file(&args.file, &args.content) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error writing to the file {}: {}", args.file.display(), e);
            ExitCode::FAILURE
        }
    };

    log.close();
    status
}

fn write_file(path: &Path, content: &OsStr) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}
