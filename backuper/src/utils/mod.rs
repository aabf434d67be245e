pub mod atomic;
pub mod errors;
pub mod logger;

pub use errors::{BackuperError, Result};
