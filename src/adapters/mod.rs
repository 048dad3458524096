//! Concrete adapter implementations for ports.

pub mod csv_audit_log;
pub mod file_config_adapter;
pub mod snapshot_feed;
