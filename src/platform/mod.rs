//! Platform access: filesystem statistics and `/proc` probing.

pub mod pal;
pub mod proc;
