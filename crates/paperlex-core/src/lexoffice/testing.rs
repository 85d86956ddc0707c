//! Fakes shared by the lexoffice unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::auth::{AuthState, Credentials};
use super::error::{AuthError, UploadError};
use super::provider::AuthStrategy;
use super::upload::{UploadResult, Voucher, VoucherTransport};

#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

type Outcome = Box<dyn Fn(usize) -> Result<AuthState, AuthError> + Send + Sync>;

/// Strategy returning a canned outcome and counting its invocations.
pub struct ScriptedStrategy {
    name: String,
    outcome: Outcome,
    delay: Duration,
    calls: CallCounter,
}

impl ScriptedStrategy {
    /// Each call yields `SESSION=<session>` plus a `GEN` cookie numbering the login.
    pub fn succeeding(name: &str, session: &str) -> Self {
        let session = session.to_string();
        Self::with_outcome(name, move |n| {
            Ok(AuthState::from_cookies([
                ("SESSION".to_string(), session.clone()),
                ("GEN".to_string(), n.to_string()),
            ])
            .expect("non-empty"))
        })
    }

    pub fn failing(name: &str, error: impl Fn() -> AuthError + Send + Sync + 'static) -> Self {
        Self::with_outcome(name, move |_| Err(error()))
    }

    fn with_outcome(
        name: &str,
        outcome: impl Fn(usize) -> Result<AuthState, AuthError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            outcome: Box::new(outcome),
            delay: Duration::ZERO,
            calls: CallCounter::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

#[async_trait]
impl AuthStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<AuthState, AuthError> {
        let n = self.calls.bump();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.outcome)(n)
    }
}

/// One physical upload as seen by the fake vendor
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub cookie_header: String,
    pub filename: String,
    pub content_type: String,
    pub content: Bytes,
}

type AttemptHook = Box<dyn Fn(usize) + Send + Sync>;

/// Vendor stand-in that replays scripted responses in order.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<UploadResult>>,
    attempts: Mutex<Vec<RecordedAttempt>>,
    on_attempt: Option<AttemptHook>,
}

impl FakeTransport {
    pub fn new(responses: Vec<UploadResult>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    /// Like `new`, running `hook` with the attempt number after each recorded upload.
    pub fn with_hook(responses: Vec<UploadResult>, hook: impl Fn(usize) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            on_attempt: Some(Box::new(hook)),
            ..Self::default()
        })
    }

    pub fn attempts(&self) -> Vec<RecordedAttempt> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoucherTransport for FakeTransport {
    async fn post_voucher(
        &self,
        auth: &AuthState,
        filename: &str,
        content_type: &str,
        content: Bytes,
    ) -> UploadResult {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(RecordedAttempt {
                cookie_header: auth.cookie_header(),
                filename: filename.to_string(),
                content_type: content_type.to_string(),
                content,
            });
            attempts.len()
        };
        if let Some(hook) = &self.on_attempt {
            hook(attempt);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(UploadError::MalformedResponse("no scripted response left".into())))
    }
}

pub fn accepted(id: &str) -> UploadResult {
    Ok(Voucher { id: id.to_string() })
}

pub fn rejected(status: u16) -> UploadResult {
    Err(UploadError::VendorRejected {
        status,
        body: String::new(),
    })
}
