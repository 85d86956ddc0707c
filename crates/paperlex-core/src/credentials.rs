//! lexoffice password in the OS keychain, keyed by lexoffice username.
//!
//! Lets `LEXOFFICE_PASSWORD` stay out of `.env` files: the binary stores
//! the password once (`--store-password`) and `Config::credentials` reads
//! it back on every start.

use anyhow::{bail, Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "paperlex-lexoffice";

fn lexoffice_entry(username: &str) -> Result<Entry> {
    if username.trim().is_empty() {
        bail!("lexoffice username must not be empty");
    }
    Entry::new(SERVICE_NAME, username).context("Failed to open keychain entry")
}

/// Stored password for `username`. `Ok(None)` when nothing was stored.
pub fn load_password(username: &str) -> Result<Option<String>> {
    match lexoffice_entry(username)?.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e).context("Failed to read lexoffice password from keychain"),
    }
}

pub fn save_password(username: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        bail!("lexoffice password must not be empty");
    }
    lexoffice_entry(username)?
        .set_password(password)
        .context("Failed to store lexoffice password in keychain")
}

/// Remove the stored password. Returns false when there was none.
pub fn forget_password(username: &str) -> Result<bool> {
    match lexoffice_entry(username)?.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => Err(e).context("Failed to remove lexoffice password from keychain"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_rejected_before_keychain() {
        assert!(save_password("bookkeeper@example.com", "").is_err());
        assert!(load_password("  ").is_err());
        assert!(forget_password("").is_err());
    }
}
