//! Per-connection I/O tasks.

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;
