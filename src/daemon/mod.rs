//! Daemon: control loop, actions, resume tracking, signals, notifications,
//! and supervisor integration.

pub mod actions;
pub mod loop_main;
pub mod notifications;
pub mod resume;
pub mod service;
pub mod signals;
