//! Signalling of job processes by pid.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Result of asking a process to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Sent,
    NoSuchProcess,
    PermissionDenied,
}

/// Process control used by the registry and the scheduler
pub trait ProcessControl: Send + Sync {
    /// Send a termination request (SIGTERM) to `pid`
    fn terminate(&self, pid: i32) -> std::io::Result<Termination>;

    /// Whether `pid` refers to a running process
    fn is_alive(&self, pid: i32) -> bool;
}

/// Real control via POSIX signals
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalControl;

impl ProcessControl for SignalControl {
    fn terminate(&self, pid: i32) -> std::io::Result<Termination> {
        if pid <= 0 {
            return Ok(Termination::NoSuchProcess);
        }
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => Ok(Termination::Sent),
            Err(Errno::ESRCH) => Ok(Termination::NoSuchProcess),
            Err(Errno::EPERM) => Ok(Termination::PermissionDenied),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // Signal 0 only checks existence; EPERM still means the pid is taken
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(errno) => errno == Errno::EPERM,
        }
    }
}
