//! Launching a job as a detached background process.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use crate::utils::{BackuperError, Result};

/// Re-run the current executable with `args` in a new session, with stdio
/// detached, and return its pid without waiting for it.
pub fn spawn_detached<I>(args: I) -> Result<u32>
where
    I: IntoIterator<Item = OsString>,
{
    let exe = std::env::current_exe()
        .map_err(|e| BackuperError::Daemon(format!("cannot locate own executable: {}", e)))?;
    spawn_detached_program(exe, args)
}

/// Start `program` detached from the terminal and the caller's session
pub fn spawn_detached_program<I>(program: impl Into<OsString>, args: I) -> Result<u32>
where
    I: IntoIterator<Item = OsString>,
{
    let mut command = Command::new(program.into());
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)
        });
    }

    let child = command
        .spawn()
        .map_err(|e| BackuperError::Daemon(format!("failed to start background process: {}", e)))?;
    Ok(child.id())
}
