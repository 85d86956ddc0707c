//! REST client for paperless-ngx.
//!
//! Provides the `PaperlessClient` for finding documents queued for upload,
//! downloading their archived files and updating tags and custom fields
//! once lexoffice has accepted them.
//!
//! The API uses token authentication (`Authorization: Token <token>`).

pub mod client;
pub mod error;

pub use client::{Document, DocumentId, PaperlessClient, TagId};
pub use error::PaperlessError;
