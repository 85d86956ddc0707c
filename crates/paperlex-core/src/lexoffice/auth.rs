use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Session cookies proving an authenticated lexoffice session.
///
/// A state always holds at least one cookie: constructors return `None`
/// for an empty set so a half-finished login can never be cached. The value
/// is replaced wholesale on refresh, never edited.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    cookies: BTreeMap<String, String>,
    obtained_at: DateTime<Utc>,
}

impl AuthState {
    pub fn from_cookies<I, K, V>(cookies: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let cookies: BTreeMap<String, String> = cookies
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        if cookies.is_empty() {
            return None;
        }

        Some(Self {
            cookies,
            obtained_at: Utc::now(),
        })
    }

    /// Value for the `Cookie` request header, e.g. `a=1; b=2`
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookie_names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    /// Always false for a state built through `from_cookies`; a deserialized
    /// state must be checked before use.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.obtained_at
    }
}

// Cookie values are session secrets
impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("cookies", &self.cookie_names().collect::<Vec<_>>())
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// lexoffice login credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cookie_set_is_absent() {
        assert!(AuthState::from_cookies(Vec::<(String, String)>::new()).is_none());
        assert!(AuthState::from_cookies([("", "orphan")]).is_none());
    }

    #[test]
    fn test_cookie_header_is_sorted_and_joined() {
        let state = AuthState::from_cookies([("SESSION", "abc"), ("XSRF-TOKEN", "def"), ("AWSALB", "x1")])
            .expect("non-empty state");
        assert_eq!(state.cookie_header(), "AWSALB=x1; SESSION=abc; XSRF-TOKEN=def");
        assert_eq!(state.cookie("SESSION"), Some("abc"));
        assert_eq!(state.cookie_names().count(), 3);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let state = AuthState::from_cookies([("SESSION", "super-secret")]).unwrap();
        let rendered = format!("{:?}", state);
        assert!(rendered.contains("SESSION"));
        assert!(!rendered.contains("super-secret"));

        let creds = Credentials::new("bookkeeper@example.com", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("bookkeeper@example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_fresh_state_age() {
        let state = AuthState::from_cookies([("SESSION", "abc")]).unwrap();
        assert!(state.age().num_seconds() <= 1);
    }
}
