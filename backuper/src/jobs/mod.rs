//! Named background jobs: the on-disk registry and process control.

pub mod process;
pub mod registry;

pub use process::{ProcessControl, SignalControl, Termination};
pub use registry::{JobRecord, JobRegistry, JobStatus, StopOutcome};
