//! Filesystem scanning for backup jobs.

pub mod walker;

pub use walker::{walk_directory, FileInfo, WalkOptions};
