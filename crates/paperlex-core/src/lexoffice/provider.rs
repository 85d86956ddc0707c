use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::auth::{AuthState, Credentials};
use super::error::AuthError;

/// One way of turning credentials into a lexoffice session.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthState, AuthError>;
}

/// Ordered chain of authentication strategies.
///
/// Strategies run in insertion order until one returns a session. When all
/// of them fail the error of the last one is returned, so a chain ending in
/// the challenge solver reports timeouts and missing solvers as such.
#[derive(Default)]
pub struct AuthProvider {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthState, AuthError> {
        let mut last_error = None;

        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), username = credentials.username(), "Attempting lexoffice login");
            match strategy.authenticate(credentials).await {
                Ok(state) => {
                    info!(strategy = strategy.name(), cookies = ?state.cookie_names().collect::<Vec<_>>(), "lexoffice session established");
                    return Ok(state);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "lexoffice login strategy failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AuthError::Exhausted))
    }
}
