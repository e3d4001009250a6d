//! Integration tests module
//!
//! Each test runs a reader over an in-memory queue with a manager publishing
//! chains to it, so the whole packet path is exercised without NFQUEUE.

pub mod common;
pub mod config_file;
pub mod link_monitor;
pub mod reconfiguration;
pub mod splitting;
