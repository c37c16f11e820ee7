//! Bracketed-level console lines on stderr.
//!
//! Every user-visible message carries its level in brackets so journal
//! greps and shell pipelines can filter without structured parsing.

#![allow(missing_docs)]

pub fn info(msg: &str) {
    eprintln!("[INFO] {msg}");
}

pub fn notice(msg: &str) {
    eprintln!("[NOTICE] {msg}");
}

pub fn warning(msg: &str) {
    eprintln!("[WARNING] {msg}");
}

pub fn critical(msg: &str) {
    eprintln!("[CRITICAL] {msg}");
}

pub fn emergency(msg: &str) {
    eprintln!("[EMERGENCY] {msg}");
}

pub fn action(msg: &str) {
    eprintln!("[ACTION] {msg}");
}

pub fn rate(msg: &str) {
    eprintln!("[RATE] {msg}");
}

pub fn escalate(msg: &str) {
    eprintln!("[ESCALATE] {msg}");
}

pub fn resume(msg: &str) {
    eprintln!("[RESUME] {msg}");
}

pub fn dry_run(msg: &str) {
    eprintln!("[DRY-RUN] {msg}");
}

pub fn error(msg: &str) {
    eprintln!("[ERROR] {msg}");
}

pub fn fatal(msg: &str) {
    eprintln!("[FATAL] {msg}");
}
