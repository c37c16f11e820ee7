//! Writer detection: block-I/O tracing and ranked writer selection.

pub mod tracer;
pub mod writers;
