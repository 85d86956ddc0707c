//! Polling orchestrator moving documents from paperless to lexoffice.
//!
//! One cycle lists documents carrying both the inbox and the lexoffice tag,
//! downloads each to the temp directory, uploads it as a voucher and, only
//! after lexoffice confirmed the upload, deletes the temp file and removes
//! the inbox tag. Failed documents keep their tags and are retried on the
//! next cycle.

pub mod lock;
pub mod orchestrator;

pub use lock::LockFile;
pub use orchestrator::{SyncReport, SyncSettings, Synchronizer};
