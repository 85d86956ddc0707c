//! Core library for paperlex.
//!
//! paperlex polls a paperless-ngx instance for documents carrying an upload
//! tag, pushes each one to lexoffice as a voucher and clears the inbox tag
//! once the upload is confirmed.
//!
//! - `lexoffice`: session cache, authentication strategies and the voucher
//!   upload executor with its single refresh-and-retry on 401
//! - `paperless`: REST client for searching, downloading and re-tagging documents
//! - `sync`: the polling orchestrator and its lock file
//! - `config` / `credentials`: runtime configuration and keychain access

pub mod config;
pub mod credentials;
pub mod lexoffice;
pub mod paperless;
pub mod sync;
pub mod util;

pub use config::Config;
pub use sync::{SyncReport, Synchronizer};
