//! lexoffice session management and voucher upload.
//!
//! The vendor rejects unauthenticated requests and drops sessions without
//! warning. This module keeps a single cached `AuthState`, obtains a new one
//! through an ordered chain of `AuthStrategy`s (direct login first, browser
//! challenge solver second), and retries an upload exactly once when the
//! vendor answers 401.

pub mod auth;
pub mod challenge;
pub mod client;
pub mod error;
pub mod provider;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthState, Credentials};
pub use challenge::{BrowserChallenge, ChallengeSolver, CommandSolver};
pub use client::{DirectLogin, LexofficeClient};
pub use error::{AuthError, UploadError};
pub use provider::{AuthProvider, AuthStrategy};
pub use session::{SessionCache, SessionStore};
pub use upload::{UploadExecutor, UploadRequest, UploadResult, Voucher, VoucherTransport};
