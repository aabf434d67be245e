pub mod shutdown;
pub mod spawn;
